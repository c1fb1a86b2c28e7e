// Error types for the gateway core

use alias_contracts::ErrorPayload;
use thiserror::Error;

/// Result type alias for gateway core operations
pub type Result<T> = std::result::Result<T, AliasError>;

/// Errors that can occur while handling a chat exchange
#[derive(Debug, Error)]
pub enum AliasError {
    /// Malformed or empty client input, reported as a 422 failed envelope
    #[error("{0}")]
    Validation(String),

    /// Structured failure signalled by the chat engine; code and message
    /// pass through to the client unchanged
    #[error("backend error {code}: {message}")]
    Backend { code: i64, message: String },

    /// Anything else, reported as a 500
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AliasError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        AliasError::Validation(msg.into())
    }

    /// Create a backend error
    pub fn backend(code: i64, msg: impl Into<String>) -> Self {
        AliasError::Backend {
            code,
            message: msg.into(),
        }
    }

    /// The wire-facing code/message pair for this error
    pub fn error_payload(&self) -> ErrorPayload {
        match self {
            AliasError::Validation(message) => ErrorPayload::new("422", message.clone()),
            AliasError::Backend { code, message } => {
                ErrorPayload::new(code.to_string(), message.clone())
            }
            AliasError::Internal(err) => ErrorPayload::new("500", err.to_string()),
        }
    }
}
