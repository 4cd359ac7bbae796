//! Poll operation errors

use super::storage::StorageError;
use super::tally::TallyError;

/// Errors returned by poll operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("Invalid poll: {0}")]
    InvalidPoll(String),

    #[error("Poll not found")]
    PollNotFound,

    #[error("Invalid option: {0}")]
    UnknownOption(String),

    /// Persisting the new state failed; the state was not changed
    #[error("Storage error: {0}")]
    Storage(String),

    /// The actor for this poll stopped before answering
    #[error("Poll actor unavailable")]
    ActorUnavailable,
}

impl PollError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            PollError::InvalidPoll(_) => "invalid_poll",
            PollError::PollNotFound => "poll_not_found",
            PollError::UnknownOption(_) => "unknown_option",
            PollError::Storage(_) => "storage",
            PollError::ActorUnavailable => "unavailable",
        }
    }
}

impl From<TallyError> for PollError {
    fn from(err: TallyError) -> Self {
        match err {
            TallyError::InvalidPoll(msg) => PollError::InvalidPoll(msg),
            TallyError::UnknownOption(option) => PollError::UnknownOption(option),
            TallyError::NotInitialized => PollError::PollNotFound,
        }
    }
}

impl From<StorageError> for PollError {
    fn from(err: StorageError) -> Self {
        PollError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_errors_map_to_poll_errors() {
        assert_eq!(
            PollError::from(TallyError::NotInitialized),
            PollError::PollNotFound
        );
        assert_eq!(
            PollError::from(TallyError::UnknownOption("X".to_string())),
            PollError::UnknownOption("X".to_string())
        );
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(PollError::PollNotFound.to_string(), "Poll not found");
        assert_eq!(
            PollError::UnknownOption("Green".to_string()).to_string(),
            "Invalid option: Green"
        );
        assert_eq!(PollError::InvalidPoll("x".to_string()).code(), "invalid_poll");
    }
}
