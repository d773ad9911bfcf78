//! Commands written to the worker's stdin, one JSON object per line.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// Action names understood by the diagnosis engine.
///
/// The orchestrator never validates actions; these exist so callers do not
/// have to spell them out.
pub mod actions {
    pub const START: &str = "start";
    pub const ADD_SYMPTOM: &str = "add_symptom";
    pub const GET_DIAGNOSIS: &str = "get_diagnosis";
}

const RESERVED_FIELDS: [&str; 2] = ["action", "request_id"];

/// A single worker command: an `action` tag plus action-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    action: String,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl Command {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            payload: Map::new(),
        }
    }

    /// The implicit handshake command sent when a session starts.
    pub fn start() -> Self {
        Self::new(actions::START)
    }

    pub fn add_symptom(symptom: impl Into<String>, certainty: f64) -> Self {
        Self::new(actions::ADD_SYMPTOM)
            .with_field("symptom", Value::String(symptom.into()))
            .with_field("certainty", Value::from(certainty))
    }

    pub fn get_diagnosis() -> Self {
        Self::new(actions::GET_DIAGNOSIS)
    }

    /// Attach a payload field. `action` and `request_id` are owned by the
    /// envelope and are ignored here.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if !RESERVED_FIELDS.contains(&key.as_str()) {
            self.payload.insert(key, value);
        }
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Serialize as one newline-terminated line.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Wrap with an explicit correlation id the worker is expected to echo.
    pub fn tagged(&self, request_id: u64) -> TaggedCommand<'_> {
        TaggedCommand {
            request_id,
            command: self,
        }
    }
}

/// A command carrying a `request_id` for key-based correlation.
#[derive(Debug, Serialize)]
pub struct TaggedCommand<'a> {
    pub request_id: u64,
    #[serde(flatten)]
    pub command: &'a Command,
}

impl TaggedCommand<'_> {
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_command_line() {
        let line = Command::start().to_line().unwrap();
        assert_eq!(line, "{\"action\":\"start\"}\n");
    }

    #[test]
    fn test_add_symptom_payload() {
        let command = Command::add_symptom("fever", 0.9);
        let value: Value = serde_json::from_str(command.to_line().unwrap().trim()).unwrap();
        assert_eq!(
            value,
            json!({"action": "add_symptom", "symptom": "fever", "certainty": 0.9})
        );
    }

    #[test]
    fn test_reserved_fields_are_ignored() {
        let command = Command::get_diagnosis()
            .with_field("action", json!("other"))
            .with_field("request_id", json!(7));
        assert_eq!(command.action(), "get_diagnosis");
        assert!(command.field("request_id").is_none());
    }

    #[test]
    fn test_unknown_actions_pass_through() {
        let command: Command =
            serde_json::from_str(r#"{"action":"explain","topic":"influenza"}"#).unwrap();
        assert_eq!(command.action(), "explain");
        assert_eq!(command.field("topic"), Some(&json!("influenza")));
    }

    #[test]
    fn test_tagged_command_carries_request_id() {
        let command = Command::add_symptom("cough", 0.5);
        let line = command.tagged(42).to_line().unwrap();
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["request_id"], json!(42));
        assert_eq!(value["action"], json!("add_symptom"));
        assert_eq!(value["symptom"], json!("cough"));
    }
}
