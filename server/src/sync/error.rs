//! Sync cycle errors.

use crate::remote::RemoteError;
use crate::store::StoreError;

/// An error raised while syncing one table.
///
/// Remote failures stay with the table that raised them; a local store
/// failure aborts the whole cycle.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("local store error: {0}")]
    LocalStore(#[from] StoreError),
}

impl SyncError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::LocalStore(_))
    }
}

impl From<fieldsync_engine::Error> for SyncError {
    fn from(err: fieldsync_engine::Error) -> Self {
        SyncError::LocalStore(StoreError::Engine(err))
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
