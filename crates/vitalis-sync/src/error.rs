//! Error types for vitalis-sync

use thiserror::Error;
use vitalis_core::CoreError;
use vitalis_storage::StorageError;

/// Errors that abort a sync pass
///
/// Provider failures never appear here; they degrade single metrics.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Calendar error: {0}")]
    Calendar(#[from] CoreError),

    #[error("Sync task error: {0}")]
    Task(String),
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
