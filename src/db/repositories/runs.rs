use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    helpers::{parse_source, to_i64, to_u32, to_u64},
    Database,
};
use crate::models::{Run, RunSummary, Sample, Segment};
use crate::persistence::{RunArchive, StoreResult};

fn row_to_summary(row: &Row) -> Result<RunSummary> {
    Ok(RunSummary {
        id: row.get("id")?,
        start_time: row.get("start_time")?,
        end_time: row.get("end_time")?,
        elapsed_ms: to_u64(row.get("elapsed_ms")?, "elapsed_ms")?,
        total_paused_ms: to_u64(row.get("total_paused_ms")?, "total_paused_ms")?,
        distance_m: row.get("distance_m")?,
        segment_count: to_u32(row.get("segment_count")?, "segment_count")?,
        sample_count: to_u64(row.get("sample_count")?, "sample_count")?,
    })
}

fn row_to_sample(row: &Row) -> Result<Sample> {
    let source: String = row.get("source")?;
    Ok(Sample {
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        accuracy_m: row.get("accuracy_m")?,
        altitude_m: row.get("altitude_m")?,
        timestamp: row.get("timestamp")?,
        source: parse_source(&source)?,
        segment_index: to_u32(row.get("segment_index")?, "segment_index")?,
        order_index: to_u64(row.get("order_index")?, "order_index")?,
    })
}

impl Database {
    /// Writes a finished run with all of its segments and samples in one
    /// transaction.
    pub async fn insert_run(&self, run: &Run) -> Result<()> {
        let record = run.clone();
        self.execute(move |conn| {
            let summary = record.summary();
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO runs (id, start_time, end_time, elapsed_ms, total_paused_ms, distance_m, segment_count, sample_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    summary.id,
                    summary.start_time,
                    summary.end_time,
                    to_i64(summary.elapsed_ms)?,
                    to_i64(summary.total_paused_ms)?,
                    summary.distance_m,
                    summary.segment_count,
                    to_i64(summary.sample_count)?,
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| format!("failed to insert run {}", summary.id))?;

            {
                let mut segment_stmt = tx.prepare(
                    "INSERT INTO run_segments (run_id, segment_index, start_time, end_time)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                let mut sample_stmt = tx.prepare(
                    "INSERT INTO run_samples (run_id, order_index, segment_index, latitude, longitude, accuracy_m, altitude_m, timestamp, source)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;

                for segment in &record.segments {
                    segment_stmt.execute(params![
                        record.id,
                        segment.index,
                        segment.start_time,
                        segment.end_time.unwrap_or(record.end_time),
                    ])?;
                    for sample in &segment.coordinates {
                        sample_stmt.execute(params![
                            record.id,
                            to_i64(sample.order_index)?,
                            sample.segment_index,
                            sample.latitude,
                            sample.longitude,
                            sample.accuracy_m,
                            sample.altitude_m,
                            sample.timestamp,
                            sample.source.as_str(),
                        ])?;
                    }
                }
            }

            tx.commit().context("failed to commit run")?;
            Ok(())
        })
        .await
    }

    pub async fn list_run_summaries(&self, limit: usize, offset: usize) -> Result<Vec<RunSummary>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, start_time, end_time, elapsed_ms, total_paused_ms, distance_m, segment_count, sample_count
                 FROM runs
                 ORDER BY start_time DESC
                 LIMIT ?1 OFFSET ?2",
            )?;
            let mut rows = stmt.query(params![limit, offset])?;
            let mut summaries = Vec::new();
            while let Some(row) = rows.next()? {
                summaries.push(row_to_summary(row)?);
            }
            Ok(summaries)
        })
        .await
    }

    pub async fn load_run(&self, run_id: &str) -> Result<Option<Run>> {
        let run_id = run_id.to_string();
        self.execute(move |conn| {
            let header = conn
                .query_row(
                    "SELECT id, start_time, end_time, elapsed_ms, total_paused_ms, distance_m, segment_count, sample_count
                     FROM runs WHERE id = ?1",
                    params![run_id],
                    |row| Ok(row_to_summary(row)),
                )
                .optional()?
                .transpose()?;
            let Some(summary) = header else {
                return Ok(None);
            };

            let mut segments = Vec::new();
            {
                let mut stmt = conn.prepare(
                    "SELECT segment_index, start_time, end_time FROM run_segments
                     WHERE run_id = ?1 ORDER BY segment_index ASC",
                )?;
                let mut rows = stmt.query(params![run_id])?;
                while let Some(row) = rows.next()? {
                    segments.push(Segment {
                        index: to_u32(row.get(0)?, "segment_index")?,
                        coordinates: Vec::new(),
                        start_time: row.get(1)?,
                        end_time: Some(row.get(2)?),
                    });
                }
            }

            let mut stmt = conn.prepare(
                "SELECT order_index, segment_index, latitude, longitude, accuracy_m, altitude_m, timestamp, source
                 FROM run_samples WHERE run_id = ?1 ORDER BY order_index ASC",
            )?;
            let mut rows = stmt.query(params![run_id])?;
            while let Some(row) = rows.next()? {
                let sample = row_to_sample(row)?;
                let segment = segments
                    .get_mut(sample.segment_index as usize)
                    .with_context(|| {
                        format!(
                            "sample {} of run {} references missing segment {}",
                            sample.order_index, run_id, sample.segment_index
                        )
                    })?;
                segment.coordinates.push(sample);
            }

            Ok(Some(Run {
                id: summary.id,
                start_time: summary.start_time,
                end_time: summary.end_time,
                segments,
                total_paused_ms: summary.total_paused_ms,
                elapsed_ms: summary.elapsed_ms,
            }))
        })
        .await
    }

    pub async fn remove_run(&self, run_id: &str) -> Result<bool> {
        let run_id = run_id.to_string();
        self.execute(move |conn| {
            let removed = conn
                .execute("DELETE FROM runs WHERE id = ?1", params![run_id])
                .with_context(|| format!("failed to delete run {run_id}"))?;
            Ok(removed > 0)
        })
        .await
    }
}

#[async_trait]
impl RunArchive for Database {
    async fn append(&self, run: &Run) -> StoreResult<()> {
        Ok(self.insert_run(run).await?)
    }

    async fn list_runs(&self, limit: usize, offset: usize) -> StoreResult<Vec<RunSummary>> {
        Ok(self.list_run_summaries(limit, offset).await?)
    }

    async fn get_run(&self, run_id: &str) -> StoreResult<Option<Run>> {
        Ok(self.load_run(run_id).await?)
    }

    async fn delete_run(&self, run_id: &str) -> StoreResult<bool> {
        Ok(self.remove_run(run_id).await?)
    }
}
