//! Error types for lamad-progress

use thiserror::Error;

/// Message shown when a remote save fails for any infrastructure reason
pub const SAVE_FAILED_MESSAGE: &str = "couldn't save, try again";

/// Message shown when an anonymous learner tries to record progress
pub const SIGN_IN_MESSAGE: &str = "sign in to save progress";

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Not signed in")]
    Unauthenticated,

    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Gate blocked: {0}")]
    GateBlocked(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Page is no longer mounted")]
    Unmounted,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProgressError {
    /// Expected conditions the learner can fix from the page itself
    pub fn is_user_recoverable(&self) -> bool {
        matches!(self, ProgressError::Unauthenticated | ProgressError::GateBlocked(_))
    }

    /// Inline text for the toast/alert surfaced to the learner
    pub fn user_message(&self) -> String {
        match self {
            ProgressError::Unauthenticated => SIGN_IN_MESSAGE.to_string(),
            ProgressError::GateBlocked(reason) => reason.clone(),
            _ => SAVE_FAILED_MESSAGE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_split() {
        assert!(ProgressError::Unauthenticated.is_user_recoverable());
        assert!(ProgressError::GateBlocked("quiz".into()).is_user_recoverable());
        assert!(!ProgressError::RemoteUnavailable("down".into()).is_user_recoverable());
        assert!(!ProgressError::Timeout("10s".into()).is_user_recoverable());
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(ProgressError::Unauthenticated.user_message(), SIGN_IN_MESSAGE);
        assert_eq!(
            ProgressError::GateBlocked("submit and pass the quiz first".into()).user_message(),
            "submit and pass the quiz first"
        );
        assert_eq!(ProgressError::Timeout("x".into()).user_message(), SAVE_FAILED_MESSAGE);
        assert_eq!(
            ProgressError::RemoteUnavailable("x".into()).user_message(),
            SAVE_FAILED_MESSAGE
        );
    }
}
