//! Error types for pipe, filter and router operations.

use thiserror::Error;

use crate::event::BranchKey;
use crate::filter::FilterState;

/// Result type alias for filterpipe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by filters, pipes and routers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A filter detected malformed input it cannot interpret.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// `BranchOpen` for a key that is already open.
    #[error("branch {0} is already open")]
    DuplicateBranch(BranchKey),

    /// An event addressed a branch that is not open.
    #[error("branch {0} is not open")]
    UnknownBranch(BranchKey),

    /// An operation was attempted on a closed or faulted filter or pipe.
    #[error("{target} is {state}")]
    State {
        /// Name of the filter, or "pipe"
        target: String,
        /// State it was in when the operation was attempted
        state: FilterState,
    },
}

impl Error {
    /// Builds a [`Error::ProtocolViolation`].
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Error::ProtocolViolation(reason.into())
    }

    pub(crate) fn state(target: impl Into<String>, state: FilterState) -> Self {
        Error::State {
            target: target.into(),
            state,
        }
    }
}
