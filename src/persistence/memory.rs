//! In-memory store standing in for SQLite in tests.
//!
//! Snapshots are kept as JSON text so a corrupt payload behaves the same way
//! it does when read back from SQLite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;

use crate::models::{Run, RunSummary, Snapshot};

use super::{RunArchive, SnapshotStore, StoreError, StoreResult};

#[derive(Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<String, String>>,
    runs: Mutex<Vec<Run>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    write_count: Mutex<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent snapshot write fail with a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent snapshot read fail with a backend error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Stores a raw payload under `key`, bypassing serialization.
    pub fn put_raw(&self, key: &str, raw: impl Into<String>) {
        lock(&self.snapshots).insert(key.to_string(), raw.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.snapshots).contains_key(key)
    }

    pub fn write_count(&self) -> u64 {
        *lock(&self.write_count)
    }

    pub fn run_count(&self) -> usize {
        lock(&self.runs).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn read(&self, key: &str) -> StoreResult<Option<Snapshot>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("simulated read failure").into());
        }
        let raw = lock(&self.snapshots).get(key).cloned();
        raw.map(|raw| Snapshot::from_json(&raw).map_err(|err| StoreError::Corrupt(err.to_string())))
            .transpose()
    }

    async fn write(&self, key: &str, snapshot: &Snapshot) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("simulated write failure").into());
        }
        let raw = snapshot
            .to_json()
            .map_err(|err| StoreError::Backend(err.into()))?;
        lock(&self.snapshots).insert(key.to_string(), raw);
        *lock(&self.write_count) += 1;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        lock(&self.snapshots).remove(key);
        Ok(())
    }
}

#[async_trait]
impl RunArchive for MemoryStore {
    async fn append(&self, run: &Run) -> StoreResult<()> {
        let mut runs = lock(&self.runs);
        if runs.iter().any(|existing| existing.id == run.id) {
            return Err(anyhow!("run {} already archived", run.id).into());
        }
        runs.push(run.clone());
        Ok(())
    }

    async fn list_runs(&self, limit: usize, offset: usize) -> StoreResult<Vec<RunSummary>> {
        let runs = lock(&self.runs);
        let mut summaries: Vec<RunSummary> = runs.iter().map(Run::summary).collect();
        summaries.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(summaries.into_iter().skip(offset).take(limit).collect())
    }

    async fn get_run(&self, run_id: &str) -> StoreResult<Option<Run>> {
        Ok(lock(&self.runs).iter().find(|run| run.id == run_id).cloned())
    }

    async fn delete_run(&self, run_id: &str) -> StoreResult<bool> {
        let mut runs = lock(&self.runs);
        let before = runs.len();
        runs.retain(|run| run.id != run_id);
        Ok(runs.len() != before)
    }
}
