use thiserror::Error;

use crate::persistence::StoreError;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("location services are disabled")]
    ServicesDisabled,

    #[error("location watcher failed to start: {0}")]
    WatcherStartFailed(String),

    #[error("snapshot write failed: {0}")]
    SnapshotWriteFailed(String),

    #[error("snapshot is corrupt: {0}")]
    SnapshotCorrupt(String),

    #[error("snapshot store error: {0}")]
    SnapshotStore(#[source] anyhow::Error),

    #[error("a run is already being tracked")]
    AlreadyActive,

    #[error("no active run")]
    NoActiveSession,

    #[error("run archive error: {0}")]
    Archive(#[source] anyhow::Error),
}

impl From<StoreError> for TrackingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt(msg) => TrackingError::SnapshotCorrupt(msg),
            StoreError::Backend(inner) => TrackingError::Archive(inner),
        }
    }
}

pub type TrackingResult<T> = Result<T, TrackingError>;
