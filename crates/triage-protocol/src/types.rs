use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error_codes;

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

/// JSON-RPC request id: a number, a string, or `null` when the request could
/// not be read far enough to know it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
    #[default]
    Null,
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
            RequestId::Null => write!(f, "null"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "default_jsonrpc")]
    jsonrpc: String,
    #[serde(default)]
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: RequestId::Number(id),
            method: method.into(),
            params,
        }
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.as_ref().and_then(|p| p.get(key))
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(|v| v.as_str())
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.param(key).and_then(|v| v.as_f64())
    }

    #[allow(clippy::result_large_err)]
    pub fn require_str(&self, key: &str) -> Result<&str, RpcResponse> {
        self.param_str(key)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                RpcResponse::error(
                    self.id.clone(),
                    error_codes::INVALID_PARAMS,
                    &format!("Missing '{}' param", key),
                )
            })
    }
}

/// Structured error details attached to domain errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub category: String,
    pub retryable: bool,
    pub suggestion: String,
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcServerError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    jsonrpc: String,
    id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RpcServerError>,
}

impl RpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, code: i32, message: &str) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id,
            result: None,
            error: Some(RpcServerError {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }

    pub fn domain_error(id: RequestId, code: i32, message: &str, data: ErrorData) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id,
            result: None,
            error: Some(RpcServerError {
                code,
                message: message.to_string(),
                data: serde_json::to_value(data).ok(),
            }),
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error_info(&self) -> Option<&RpcServerError> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
