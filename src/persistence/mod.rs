//! Storage seams the tracking core depends on.
//!
//! The SQLite-backed [`crate::db::Database`] implements both traits; tests
//! substitute an in-memory fake.

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Run, RunSummary, Snapshot};

#[cfg(test)]
pub use memory::MemoryStore;

/// The single slot holding the live run's snapshot.
pub const CURRENT_TRACKING_KEY: &str = "current-tracking";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("stored snapshot is corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn read(&self, key: &str) -> StoreResult<Option<Snapshot>>;

    async fn write(&self, key: &str, snapshot: &Snapshot) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// History of completed runs.
#[async_trait]
pub trait RunArchive: Send + Sync {
    async fn append(&self, run: &Run) -> StoreResult<()>;

    async fn list_runs(&self, limit: usize, offset: usize) -> StoreResult<Vec<RunSummary>>;

    async fn get_run(&self, run_id: &str) -> StoreResult<Option<Run>>;

    /// Returns `false` when no run with that id existed.
    async fn delete_run(&self, run_id: &str) -> StoreResult<bool>;
}
