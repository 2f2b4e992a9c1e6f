//! Error types for the live connection core.

use crate::reconcile::ValidationError;
use kraken_protocol::ProtocolError;
use thiserror::Error;

/// Result type for live connection operations.
pub type LiveResult<T> = Result<T, LiveError>;

/// Errors that can occur while keeping the cluster mirror live.
#[derive(Error, Debug)]
pub enum LiveError {
    /// A controller request failed or returned an unusable body.
    #[error("fetch {url} failed: {message}")]
    Fetch {
        /// Requested URL.
        url: String,
        /// Error message.
        message: String,
    },

    /// A controller payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] ProtocolError),

    /// CFG and DSC collections are structurally inconsistent.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The push socket may not be opened from this context.
    #[error("push socket refused in an insecure context")]
    InsecureContext,

    /// The push socket could not be established.
    #[error("push socket unavailable: {0}")]
    SocketUnavailable(String),

    /// A control message arrived before `START`.
    #[error("{0} received before start")]
    NotStarted(&'static str),

    /// `START` was received twice.
    #[error("worker already started")]
    AlreadyStarted,

    /// `START` lacked its configuration.
    #[error("start message config was undefined")]
    MissingStartConfig,

    /// A control message lacked its configuration.
    #[error("message config was undefined")]
    MissingConfig,

    /// A control message could not be parsed.
    #[error("invalid control message: {0}")]
    InvalidMessage(String),

    /// A node id is not present in the mirrors.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// The worker task has stopped.
    #[error("worker closed")]
    WorkerClosed,
}

impl LiveError {
    /// Creates a fetch error.
    pub fn fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Returns true if the state machine recovers from this error by a
    /// state transition rather than reporting it to the host.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LiveError::Fetch { .. }
                | LiveError::Decode(_)
                | LiveError::Validation(_)
                | LiveError::InsecureContext
                | LiveError::SocketUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_errors() {
        assert!(LiveError::fetch("http://x/cfg/nodes", "refused").is_recoverable());
        assert!(LiveError::InsecureContext.is_recoverable());
        assert!(LiveError::Validation(ValidationError::MissingCfgMaster).is_recoverable());
        assert!(!LiveError::MissingConfig.is_recoverable());
        assert!(!LiveError::MissingStartConfig.is_recoverable());
        assert!(!LiveError::NotStarted("CONFIG").is_recoverable());
        assert!(!LiveError::UnknownNode("n9".into()).is_recoverable());
    }

    #[test]
    fn error_display() {
        let err = LiveError::fetch("http://x/dsc/nodes", "timed out");
        assert_eq!(err.to_string(), "fetch http://x/dsc/nodes failed: timed out");
        assert_eq!(
            LiveError::MissingConfig.to_string(),
            "message config was undefined"
        );
        assert_eq!(
            LiveError::MissingStartConfig.to_string(),
            "start message config was undefined"
        );
        assert_eq!(
            LiveError::NotStarted("POWER").to_string(),
            "POWER received before start"
        );
    }
}
