//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while decoding controller payloads.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The payload was not valid JSON or did not match the expected shape.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// A state value was not one of the known enum values.
    #[error("unknown {kind} value: {value}")]
    UnknownState {
        /// Which enum was being parsed.
        kind: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The payload was valid JSON but structurally unexpected.
    #[error("invalid structure: {0}")]
    InvalidStructure(String),
}

impl ProtocolError {
    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::UnknownState {
            kind: "physState",
            value: "MELTED".into(),
        };
        assert_eq!(err.to_string(), "unknown physState value: MELTED");

        let err = ProtocolError::invalid_structure("expected array");
        assert!(err.to_string().contains("expected array"));
    }
}
