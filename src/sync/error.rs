use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::state::StateError;
use crate::twitch::ApiError;

/// Why a sync invocation aborted. Nothing is committed in any of these cases.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another invocation on the same engine has not finished yet.
    #[error("A sync is already in progress")]
    AlreadyRunning,

    #[error("Clips API: {0}")]
    Api(#[from] ApiError),

    #[error("Clip store: {0}")]
    State(#[from] StateError),

    #[error("Checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Invalid timestamp {value:?}: {source}")]
    InvalidTimestamp {
        value: String,
        source: chrono::ParseError,
    },
}

impl SyncError {
    /// Whether the scheduler should treat this as a skipped tick rather than
    /// a failure.
    pub fn is_skip(&self) -> bool {
        matches!(self, SyncError::AlreadyRunning)
    }
}
