use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::db::Database;
use crate::models::Snapshot;
use crate::persistence::{SnapshotStore, StoreError, StoreResult};

impl Database {
    pub async fn read_snapshot_payload(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let payload = conn
                .query_row(
                    "SELECT payload FROM tracking_snapshots WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .context("failed to read tracking snapshot")?;
            Ok(payload)
        })
        .await
    }

    pub async fn upsert_snapshot_payload(&self, key: &str, payload: String, saved_at: i64) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO tracking_snapshots (key, payload, saved_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     payload = excluded.payload,
                     saved_at = excluded.saved_at,
                     updated_at = excluded.updated_at",
                params![key, payload, saved_at, Utc::now().to_rfc3339()],
            )
            .context("failed to write tracking snapshot")?;
            Ok(())
        })
        .await
    }

    pub async fn delete_snapshot_payload(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM tracking_snapshots WHERE key = ?1", params![key])
                .context("failed to delete tracking snapshot")?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl SnapshotStore for Database {
    async fn read(&self, key: &str) -> StoreResult<Option<Snapshot>> {
        let Some(payload) = self.read_snapshot_payload(key).await? else {
            return Ok(None);
        };
        Snapshot::from_json(&payload)
            .map(Some)
            .map_err(|err| StoreError::Corrupt(err.to_string()))
    }

    async fn write(&self, key: &str, snapshot: &Snapshot) -> StoreResult<()> {
        let payload = snapshot
            .to_json()
            .context("failed to serialize tracking snapshot")?;
        Ok(self
            .upsert_snapshot_payload(key, payload, snapshot.saved_at)
            .await?)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        Ok(self.delete_snapshot_payload(key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::CURRENT_TRACKING_KEY;
    use crate::tracking::{recovery::capture_snapshot, RunSession};

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("snapshots.sqlite3")).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn test_write_overwrites_single_slot() {
        let (_dir, db) = open();
        let session = RunSession::start("run".into(), 0);

        db.write(CURRENT_TRACKING_KEY, &capture_snapshot(&session, 1))
            .await
            .unwrap();
        db.write(CURRENT_TRACKING_KEY, &capture_snapshot(&session, 2))
            .await
            .unwrap();

        let stored = db.read(CURRENT_TRACKING_KEY).await.unwrap().unwrap();
        assert_eq!(stored.saved_at, 2);
        assert_eq!(stored.current_segment_index, Some(0));

        db.delete(CURRENT_TRACKING_KEY).await.unwrap();
        assert!(db.read(CURRENT_TRACKING_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_garbage_payload_reads_as_corrupt() {
        let (_dir, db) = open();
        db.upsert_snapshot_payload(CURRENT_TRACKING_KEY, "[1, 2".into(), 0)
            .await
            .unwrap();

        assert!(matches!(
            db.read(CURRENT_TRACKING_KEY).await,
            Err(StoreError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.sqlite3");
        let session = RunSession::start("persisted".into(), 5);
        {
            let db = Database::new(path.clone()).unwrap();
            db.write(CURRENT_TRACKING_KEY, &capture_snapshot(&session, 5))
                .await
                .unwrap();
        }

        let db = Database::new(path).unwrap();
        let stored = db.read(CURRENT_TRACKING_KEY).await.unwrap().unwrap();
        assert_eq!(stored.run_id, "persisted");
    }
}
