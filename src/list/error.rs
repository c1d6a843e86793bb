use thiserror::Error;

use crate::store::StoreError;

/// Failures surfaced by the list synchronizer
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Error fetching items: {0}")]
    FetchFailed(#[source] StoreError),
    #[error("Error adding item: {0}")]
    InsertFailed(#[source] StoreError),
    #[error("Error toggling item: {0}")]
    UpdateFailed(#[source] StoreError),
    #[error("Error removing item: {0}")]
    DeleteFailed(#[source] StoreError),
    #[error("Error subscribing to changes: {0}")]
    SubscribeFailed(#[source] StoreError),
    #[error("Item not found: {0}")]
    NotFound(i64),
    #[error("Not authorized, sign in again")]
    AuthFailed,
}

impl SyncError {
    /// Wrap a store error for `op`, lifting auth rejections out of the
    /// per-operation variants
    pub(crate) fn from_store(err: StoreError, op: fn(StoreError) -> SyncError) -> Self {
        match err {
            StoreError::AuthFailed => SyncError::AuthFailed,
            other => op(other),
        }
    }
}
