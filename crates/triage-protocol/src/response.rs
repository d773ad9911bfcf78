//! Responses decoded from single lines of worker stdout.
//!
//! The orchestrator treats a response as an opaque JSON value. The accessors
//! below read the fields the diagnosis engine conventionally emits and return
//! `None` when a field is absent or has an unexpected shape.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// A question the engine wants answered next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub symptom: String,
    pub text: String,
}

/// One ranked candidate in a diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisEntry {
    pub disease: String,
    pub certainty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerResponse(Value);

impl WorkerResponse {
    /// Decode one line of worker output (without its terminator).
    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim()).map(Self)
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Correlation id echoed by workers that speak the tagged protocol.
    pub fn request_id(&self) -> Option<u64> {
        self.0.get("request_id").and_then(Value::as_u64)
    }

    pub fn status(&self) -> Option<&str> {
        self.0.get("status").and_then(Value::as_str)
    }

    pub fn message(&self) -> Option<&str> {
        self.0.get("message").and_then(Value::as_str)
    }

    pub fn error_code(&self) -> Option<&str> {
        self.0.get("error_code").and_then(Value::as_str)
    }

    /// True when the engine reported a domain-level error. This is still a
    /// successfully correlated response as far as the orchestrator is concerned.
    pub fn is_error(&self) -> bool {
        self.status() == Some("error")
    }

    pub fn next_question(&self) -> Option<Question> {
        self.0
            .get("next_question")
            .and_then(|q| serde_json::from_value(q.clone()).ok())
    }

    pub fn diagnosis(&self) -> Option<Vec<DiagnosisEntry>> {
        self.0
            .get("diagnosis")
            .and_then(|d| serde_json::from_value(d.clone()).ok())
    }
}

impl From<WorkerResponse> for Value {
    fn from(response: WorkerResponse) -> Self {
        response.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_next_question() {
        let response = WorkerResponse::decode(
            r#"{"status":"success","message":"Symptom recorded","next_question":{"symptom":"cough","text":"Do you have a cough?"}}"#,
        )
        .unwrap();

        assert_eq!(response.status(), Some("success"));
        assert!(!response.is_error());
        assert_eq!(
            response.next_question(),
            Some(Question {
                symptom: "cough".to_string(),
                text: "Do you have a cough?".to_string(),
            })
        );
        assert!(response.diagnosis().is_none());
    }

    #[test]
    fn test_decode_diagnosis() {
        let response = WorkerResponse::decode(
            "{\"status\":\"success\",\"diagnosis\":[{\"disease\":\"Influenza\",\"certainty\":0.85}]}\r\n",
        )
        .unwrap();

        let diagnosis = response.diagnosis().unwrap();
        assert_eq!(diagnosis.len(), 1);
        assert_eq!(diagnosis[0].disease, "Influenza");
        assert!((diagnosis[0].certainty - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_engine_error_is_still_a_response() {
        let response = WorkerResponse::decode(
            r#"{"status":"error","message":"Symptom name is required","error_code":"MISSING_SYMPTOM"}"#,
        )
        .unwrap();
        assert!(response.is_error());
        assert_eq!(response.error_code(), Some("MISSING_SYMPTOM"));
        assert_eq!(response.message(), Some("Symptom name is required"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(WorkerResponse::decode("Traceback (most recent call last):").is_err());
        assert!(WorkerResponse::decode("{\"status\":").is_err());
    }

    #[test]
    fn test_request_id_and_opaque_shapes() {
        let tagged = WorkerResponse::decode(r#"{"request_id":9,"status":"success"}"#).unwrap();
        assert_eq!(tagged.request_id(), Some(9));

        let scalar = WorkerResponse::decode("42").unwrap();
        assert_eq!(scalar.as_value(), &json!(42));
        assert!(scalar.status().is_none());
        assert!(scalar.request_id().is_none());
    }
}
