//! Error types for the json-eval library
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EvalError>;

/// Main error type for engine and bridge operations
///
/// The `Display` text of each variant is what crosses the C boundary in
/// `FFIResult::error`, so messages are kept short and self-contained.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// Malformed JSON or MessagePack input
    #[error("Parse error: {0}")]
    Parse(String),

    /// Schema walk failures (bad `$evaluation`, circular dependencies)
    #[error("Schema error: {0}")]
    Schema(String),

    /// Logic compilation or evaluation errors
    #[error("Logic error: {0}")]
    Logic(String),

    /// Handle was never issued or has been freed
    #[error("Invalid handle")]
    InvalidHandle,

    /// Key missing from a parsed-schema cache
    #[error("Schema '{0}' not found in cache")]
    CacheMiss(String),

    /// No subform registered at the given path
    #[error("Subform not found: {0}")]
    SubformNotFound(String),

    /// The instance's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// Output serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Null pointers, bad UTF-8, unknown selectors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::Parse(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for EvalError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        EvalError::Parse(format!("MessagePack: {}", err))
    }
}

impl From<rmp_serde::encode::Error> for EvalError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        EvalError::Serialization(err.to_string())
    }
}
