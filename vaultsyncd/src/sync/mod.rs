pub mod cloud_listener;
pub mod context;
pub mod delete;
pub mod dispatch;
pub mod download;
pub mod file_times;
pub mod local_watcher;
pub mod loop_guard;
pub mod paths;
pub mod retry;
pub mod session;
pub mod status;
pub mod transfer;
pub mod upload;

#[cfg(test)]
mod test_support;

use thiserror::Error;
use vaultsync_core::{StoreError, TimestampError};

use self::paths::PathError;
use self::transfer::TransferError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("trash error: {0}")]
    Trash(#[from] trash::Error),
}
