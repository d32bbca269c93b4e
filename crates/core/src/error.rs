use offer_agent_model::ModelProviderError;
use thiserror::Error;

use crate::store::StoreError;
use crate::validator::StructuralViolation;

/// Errors that abort an orchestration run.
///
/// Nothing is persisted for the aborted round, the conversation stays in
/// its last saved state.
#[derive(Debug, Error)]
pub enum Error {
    /// The conversation doesn't exist in the store.
    #[error("conversation `{0}` not found")]
    ConversationNotFound(String),
    /// The request sequence broke the tool pairing rules.
    #[error(transparent)]
    Structural(#[from] StructuralViolation),
    /// The model provider failed to open or stream a response.
    #[error("model request failed: {0}")]
    Model(Box<dyn ModelProviderError>),
    /// The stream ended without a complete message.
    #[error("the response ended without a complete message")]
    IncompleteResponse,
    /// A round exceeded its deadline.
    #[error("round {0} timed out")]
    RoundTimeout(usize),
    /// The run was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,
    /// The model kept calling tools past the configured limit.
    #[error("exceeded the limit of {0} rounds")]
    RoundLimitExceeded(usize),
    /// The caller supplied an unusable input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A choice response didn't match a pending choice.
    #[error("cannot respond to choice: {0}")]
    Choice(String),
    /// The conversation store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// Returns `true` if sending the same input again may succeed.
    ///
    /// Structural violations are programming errors and never qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Model(err) => err.is_transient(),
            Error::IncompleteResponse | Error::RoundTimeout(_) => true,
            Error::Store(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if the error indicates a bug rather than a runtime
    /// condition, and should alert operators.
    #[inline]
    pub fn is_structural(&self) -> bool {
        matches!(self, Error::Structural(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_is_not_retryable() {
        let err = Error::from(StructuralViolation {
            reasons: vec!["turn 1: missing result for `t1`".to_owned()],
        });
        assert!(err.is_structural());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "structural violation: turn 1: missing result for `t1`"
        );
        assert!(Error::RoundTimeout(2).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }
}
