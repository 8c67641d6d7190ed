use serde::Serialize;
use thiserror::Error;

/// Errors surfaced to consumers of the synchronization core.
///
/// Storage and transport failures never appear here directly; they are
/// folded into [`ChatError::TransientUnavailable`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// A direct or group membership rule was violated.
    #[error("Invalid membership: {0}")]
    InvalidMembership(String),

    /// The message, conversation or user does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed attachment registration or mismatched attachment kind.
    #[error("Invalid attachment: {0}")]
    InvalidAttachment(String),

    /// Empty or oversized message content.
    #[error("Invalid content: {0}")]
    InvalidContent(String),

    /// The underlying store is temporarily unreachable. Safe to retry with
    /// backoff, using a request id for appends.
    #[error("Temporarily unavailable: {0}")]
    TransientUnavailable(String),
}

/// Class of user-visible feedback an error maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    /// Blocking validation message; retrying the same input will fail again.
    Validation,
    /// The referenced record is gone.
    Missing,
    /// Transient "retry" state.
    Retry,
}

impl ChatError {
    pub fn feedback(&self) -> Feedback {
        match self {
            Self::InvalidMembership(_) | Self::InvalidAttachment(_) | Self::InvalidContent(_) => {
                Feedback::Validation
            }
            Self::NotFound(_) => Feedback::Missing,
            Self::TransientUnavailable(_) => Feedback::Retry,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.feedback() == Feedback::Retry
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMembership(_) => "invalid_membership",
            Self::NotFound(_) => "not_found",
            Self::InvalidAttachment(_) => "invalid_attachment",
            Self::InvalidContent(_) => "invalid_content",
            Self::TransientUnavailable(_) => "transient_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(ChatError::TransientUnavailable("db busy".into()).is_retryable());
        assert!(!ChatError::InvalidMembership("x".into()).is_retryable());
        assert!(!ChatError::InvalidAttachment("x".into()).is_retryable());
        assert!(!ChatError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn validation_kinds_share_one_feedback_class() {
        assert_eq!(ChatError::InvalidContent("x".into()).feedback(), Feedback::Validation);
        assert_eq!(ChatError::InvalidMembership("x".into()).feedback(), Feedback::Validation);
        assert_eq!(ChatError::NotFound("x".into()).feedback(), Feedback::Missing);
    }
}
