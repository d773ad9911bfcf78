//! Domain errors for session orchestration.
//!
//! Every variant maps to a JSON-RPC error code and carries structured context
//! so callers can decide programmatically whether to retry or start over.

use serde_json::{json, Value};
use thiserror::Error;
use triage_common::error_codes::{self, ErrorCategory};
use triage_protocol::ErrorData;

/// Session-level errors. Cloneable so one worker failure can be fanned out to
/// every outstanding waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Failed to start worker '{program}': {reason}")]
    StartupFailure { program: String, reason: String },
    #[error("Worker handshake failed: {0}")]
    HandshakeFailure(String),
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Session is no longer active: {0}")]
    Inactive(String),
    #[error("No response from worker within {timeout_ms}ms")]
    RequestTimeout { timeout_ms: u64 },
    #[error("Worker terminated: {0}")]
    WorkerTerminated(String),
    #[error("Could not decode worker response: {reason}")]
    DecodeFailure { reason: String, line: String },
    #[error("Session limit reached: maximum {0} sessions allowed")]
    LimitReached(usize),
    #[error("Orchestrator is shutting down")]
    ShuttingDown,
    #[error("Command could not be encoded: {0}")]
    Encode(String),
}

impl SessionError {
    /// Returns the JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            SessionError::StartupFailure { .. } => error_codes::WORKER_STARTUP,
            SessionError::HandshakeFailure(_) => error_codes::WORKER_HANDSHAKE,
            SessionError::NotFound(_) => error_codes::SESSION_NOT_FOUND,
            SessionError::Inactive(_) => error_codes::SESSION_INACTIVE,
            SessionError::RequestTimeout { .. } => error_codes::REQUEST_TIMEOUT,
            SessionError::WorkerTerminated(_) => error_codes::WORKER_TERMINATED,
            SessionError::DecodeFailure { .. } => error_codes::DECODE_FAILURE,
            SessionError::LimitReached(_) => error_codes::SESSION_LIMIT,
            SessionError::ShuttingDown => error_codes::DAEMON_ERROR,
            SessionError::Encode(_) => error_codes::INVALID_PARAMS,
        }
    }

    /// Returns the error category for programmatic handling.
    pub fn category(&self) -> ErrorCategory {
        error_codes::category_for_code(self.code())
    }

    /// Returns structured context about the error for debugging.
    pub fn context(&self) -> Value {
        match self {
            SessionError::StartupFailure { program, reason } => {
                json!({ "program": program, "reason": reason })
            }
            SessionError::HandshakeFailure(reason) => json!({ "reason": reason }),
            SessionError::NotFound(id) | SessionError::Inactive(id) => {
                json!({ "session_id": id })
            }
            SessionError::RequestTimeout { timeout_ms } => json!({ "timeout_ms": timeout_ms }),
            SessionError::WorkerTerminated(reason) => json!({ "reason": reason }),
            SessionError::DecodeFailure { reason, line } => {
                json!({ "reason": reason, "line": line })
            }
            SessionError::LimitReached(max) => json!({ "max_sessions": max }),
            SessionError::ShuttingDown => json!({}),
            SessionError::Encode(reason) => json!({ "reason": reason }),
        }
    }

    /// Returns a helpful suggestion for resolving the error.
    pub fn suggestion(&self) -> String {
        match self {
            SessionError::StartupFailure { .. } => {
                "Check TRIAGE_WORKER_EXECUTABLE and TRIAGE_WORKER_PATH point at a runnable engine."
                    .to_string()
            }
            SessionError::HandshakeFailure(_) => {
                "The engine did not answer its start command. Check its stderr output in the logs."
                    .to_string()
            }
            SessionError::NotFound(_) | SessionError::Inactive(_) => {
                "Session not found or expired. Start a new diagnosis session.".to_string()
            }
            SessionError::RequestTimeout { .. } => {
                "The engine is slow to respond. Retry, or raise TRIAGE_REQUEST_TIMEOUT_MS."
                    .to_string()
            }
            SessionError::WorkerTerminated(_) => {
                "The engine process stopped. Start a new diagnosis session.".to_string()
            }
            SessionError::DecodeFailure { .. } => {
                "The engine wrote a malformed line. Retry the request.".to_string()
            }
            SessionError::LimitReached(_) => {
                "End unused sessions or increase the limit with TRIAGE_MAX_SESSIONS.".to_string()
            }
            SessionError::ShuttingDown => {
                "The orchestrator is stopping. Retry once it has restarted.".to_string()
            }
            SessionError::Encode(_) => {
                "Command payload fields must be plain JSON values.".to_string()
            }
        }
    }

    /// Returns whether this error is potentially transient and may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        error_codes::is_retryable(self.code())
    }

    /// Structured payload for the `data` member of a JSON-RPC error.
    pub fn error_data(&self) -> ErrorData {
        ErrorData {
            category: self.category().as_str().to_string(),
            retryable: self.is_retryable(),
            suggestion: self.suggestion(),
            context: self.context(),
        }
    }
}

/// Process lifecycle errors.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Failed to setup signal handler: {0}")]
    SignalSetup(String),
    #[error("Failed to read requests: {0}")]
    Input(String),
    #[error("Failed to write responses: {0}")]
    Output(String),
}

impl DaemonError {
    /// Returns the JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        error_codes::DAEMON_ERROR
    }

    /// Returns the error category for programmatic handling.
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::External
    }

    /// Returns structured context about the error for debugging.
    pub fn context(&self) -> Value {
        match self {
            DaemonError::SignalSetup(reason) => {
                json!({ "operation": "signal_setup", "reason": reason })
            }
            DaemonError::Input(reason) => json!({ "operation": "read", "reason": reason }),
            DaemonError::Output(reason) => json!({ "operation": "write", "reason": reason }),
        }
    }

    /// Returns a helpful suggestion for resolving the error.
    pub fn suggestion(&self) -> String {
        match self {
            DaemonError::SignalSetup(_) => {
                "Signal handler setup failed. Check system signal configuration.".to_string()
            }
            DaemonError::Input(_) | DaemonError::Output(_) => {
                "The client closed its end of the pipe. Restart the orchestrator.".to_string()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        false
    }
}
