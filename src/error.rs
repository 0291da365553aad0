//! Error types for the agent SDK

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the SDK.
///
/// Variants are grouped by the error-kind taxonomy the engine and workflow
/// dispatch on: configuration and validation errors never retry, transport
/// errors retry at task granularity, cancellation always wins.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport failure (connection, DNS, TLS).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Subprocess spawn or I/O failure.
    #[error("subprocess error: {0}")]
    Subprocess(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing credentials, unknown model, invalid flag.
    #[error("configuration error: {0}")]
    Config(String),

    /// Non-2xx response from a provider, malformed stream, or unexpected stop reason.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Tool input failed schema or `validate`.
    #[error("validation error: {0}")]
    Validation(String),

    /// A tool returned an error or panicked during execution.
    #[error("tool execution error: {0}")]
    Tool(String),

    /// The run's cancellation token was triggered.
    #[error("cancelled")]
    Cancelled,

    /// The iteration cap was reached before the run produced end_turn.
    #[error("max iterations exceeded")]
    MaxIterationsExceeded,

    /// Request timed out.
    #[error("request timeout")]
    Timeout,

    /// Catch-all for conditions that don't fit the taxonomy above.
    #[error("error: {0}")]
    Other(String),
}

impl Error {
    pub fn subprocess(msg: impl Into<String>) -> Self {
        Error::Subprocess(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Whether this error kind is eligible for the scheduler's task-granularity retry.
    ///
    /// Only Transport/Subprocess/Protocol/Timeout are transient per the error-handling
    /// design; configuration, validation, and cancellation are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Subprocess(_) | Error::Protocol(_) | Error::Timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("missing model");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "configuration error: missing model");
    }

    #[test]
    fn test_error_validation() {
        let err = Error::validation("missing field: path");
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::subprocess("spawn failed").is_retryable());
        assert!(Error::protocol("bad stream").is_retryable());
        assert!(Error::Timeout.is_retryable());
        assert!(!Error::config("bad flag").is_retryable());
        assert!(!Error::validation("bad input").is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
