use qs_id::IdError;
use thiserror::Error;

/// Reasons a single notification or worker descriptor cannot be applied.
///
/// These never fail a batch; they are recorded as task errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperationError {
    #[error("task has {count} qs_account tags, at most one allowed")]
    AmbiguousAccount { count: usize },

    #[error("invalid account id: {0}")]
    InvalidAccount(#[source] IdError),

    #[error("invalid task id: {0}")]
    InvalidTaskId(#[source] IdError),

    #[error("invalid bot id: {0}")]
    InvalidBotId(#[source] IdError),

    #[error("running task has no bot id")]
    MissingBotId,

    #[error("unsupported slice count {0}, expected 1 or 2")]
    UnsupportedSliceCount(usize),

    #[error("dimension {0:?} of the second slice is not in the first slice")]
    SliceNotSubset(String),

    #[error("unrecognized task state {0:#x}")]
    UnknownState(u32),
}
