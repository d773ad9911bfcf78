//! Semantic error codes for JSON-RPC domain errors.
//!
//! Error codes follow the JSON-RPC 2.0 specification:
//! - -32700 to -32600: Reserved protocol errors
//! - -32000 to -32099: Server errors (we use -32001 to -32020 for domain errors)

// Protocol errors
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;

// Session-related errors
pub const SESSION_NOT_FOUND: i32 = -32001;
pub const SESSION_INACTIVE: i32 = -32002;
pub const SESSION_LIMIT: i32 = -32006;

// Worker process errors
pub const WORKER_STARTUP: i32 = -32010;
pub const WORKER_HANDSHAKE: i32 = -32011;
pub const WORKER_TERMINATED: i32 = -32012;

// Request-level errors
pub const REQUEST_TIMEOUT: i32 = -32013;
pub const DECODE_FAILURE: i32 = -32014;

// Daemon errors
pub const DAEMON_ERROR: i32 = -32016;

// Fallback for anything unclassified
pub const GENERIC_ERROR: i32 = -32000;

/// Error category for programmatic handling by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Resource not found (unknown or expired session)
    NotFound,
    /// Invalid input parameters
    InvalidInput,
    /// Resource limit reached
    Busy,
    /// Internal server error
    Internal,
    /// External dependency failure (worker process)
    External,
    /// Operation timed out
    Timeout,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::Busy => "busy",
            ErrorCategory::Internal => "internal",
            ErrorCategory::External => "external",
            ErrorCategory::Timeout => "timeout",
        }
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_found" => Ok(ErrorCategory::NotFound),
            "invalid_input" => Ok(ErrorCategory::InvalidInput),
            "busy" => Ok(ErrorCategory::Busy),
            "internal" => Ok(ErrorCategory::Internal),
            "external" => Ok(ErrorCategory::External),
            "timeout" => Ok(ErrorCategory::Timeout),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returns whether an error code represents a retriable operation.
///
/// Retriable errors leave the session usable: a timed out or garbled
/// response does not invalidate the worker.
pub fn is_retryable(code: i32) -> bool {
    matches!(code, REQUEST_TIMEOUT | DECODE_FAILURE | GENERIC_ERROR)
}

/// Returns the error category for a given error code.
pub fn category_for_code(code: i32) -> ErrorCategory {
    match code {
        SESSION_NOT_FOUND | SESSION_INACTIVE | METHOD_NOT_FOUND => ErrorCategory::NotFound,
        INVALID_PARAMS | INVALID_REQUEST | PARSE_ERROR => ErrorCategory::InvalidInput,
        SESSION_LIMIT => ErrorCategory::Busy,
        WORKER_STARTUP | WORKER_HANDSHAKE | WORKER_TERMINATED | DECODE_FAILURE => {
            ErrorCategory::External
        }
        REQUEST_TIMEOUT => ErrorCategory::Timeout,
        _ => ErrorCategory::Internal,
    }
}
