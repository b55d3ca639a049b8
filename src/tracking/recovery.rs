//! Conversion between the live session and its persisted snapshot.

use std::collections::BTreeMap;

use crate::models::{Sample, Segment, SegmentBounds, Snapshot, SNAPSHOT_VERSION};

use super::error::{TrackingError, TrackingResult};
use super::session::{RunSession, SessionState};

pub fn capture_snapshot(session: &RunSession, now: i64) -> Snapshot {
    let current = session
        .current_segment_index()
        .and_then(|index| session.segments().get(index as usize));

    Snapshot {
        version: SNAPSHOT_VERSION,
        run_id: session.id().to_string(),
        start_time: session.start_time(),
        coordinates: session.samples().cloned().collect(),
        is_tracking: session.state() == SessionState::Tracking,
        is_paused: session.state() == SessionState::Paused,
        total_paused_ms: session.total_paused_ms(),
        pause_started_at: session.pause_started_at(),
        current_segment_index: current.map(|segment| segment.index),
        current_segment_start_time: current.map(|segment| segment.start_time),
        elapsed_ms: session.elapsed_ms(),
        segments: session
            .segments()
            .iter()
            .map(|segment| SegmentBounds {
                index: segment.index,
                start_time: segment.start_time,
                end_time: segment.end_time,
            })
            .collect(),
        saved_at: now,
    }
}

/// Rebuilds a paused session from a snapshot of an in-progress run.
///
/// A snapshot taken while tracking has its open segment closed at the
/// instant the process stopped ticking, and that instant becomes the pause
/// start, so the time the process was dead is counted as paused.
pub fn restore_session(snapshot: Snapshot) -> TrackingResult<RunSession> {
    if snapshot.run_id.trim().is_empty() {
        return Err(corrupt("missing run id"));
    }
    if snapshot.version > SNAPSHOT_VERSION {
        return Err(corrupt(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }
    validate_coordinates(&snapshot.coordinates)?;

    let bounds = if snapshot.segments.is_empty() {
        rebuild_bounds(&snapshot)?
    } else {
        snapshot.segments.clone()
    };
    validate_bounds(&bounds, &snapshot.coordinates)?;

    let mut segments: Vec<Segment> = bounds
        .iter()
        .map(|b| Segment {
            index: b.index,
            coordinates: Vec::new(),
            start_time: b.start_time,
            end_time: b.end_time,
        })
        .collect();
    for sample in &snapshot.coordinates {
        segments[sample.segment_index as usize]
            .coordinates
            .push(sample.clone());
    }

    let freeze_at = freeze_instant(&snapshot)?;
    let pause_started_at = match segments.last_mut() {
        Some(open) if open.is_open() => {
            let end = freeze_at
                .max(open.start_time)
                .max(open.last_timestamp().unwrap_or(i64::MIN));
            open.close(end);
            Some(end)
        }
        Some(closed) => snapshot
            .pause_started_at
            .or(closed.end_time)
            .or(Some(freeze_at)),
        None => return Err(corrupt("snapshot has no segments")),
    };

    let next_order_index = match snapshot.coordinates.last() {
        Some(sample) => sample
            .order_index
            .checked_add(1)
            .ok_or_else(|| corrupt("order index out of range"))?,
        None => 0,
    };

    Ok(RunSession {
        id: snapshot.run_id,
        start_time: snapshot.start_time,
        state: SessionState::Paused,
        segments,
        total_paused_ms: snapshot.total_paused_ms,
        pause_started_at,
        elapsed_ms: snapshot.elapsed_ms,
        next_order_index,
    })
}

fn corrupt(message: impl Into<String>) -> TrackingError {
    TrackingError::SnapshotCorrupt(message.into())
}

/// The instant the run stopped advancing: `start + paused + elapsed`.
fn freeze_instant(snapshot: &Snapshot) -> TrackingResult<i64> {
    let paused = i64::try_from(snapshot.total_paused_ms)
        .map_err(|_| corrupt("paused time out of range"))?;
    let elapsed =
        i64::try_from(snapshot.elapsed_ms).map_err(|_| corrupt("elapsed time out of range"))?;
    snapshot
        .start_time
        .checked_add(paused)
        .and_then(|at| at.checked_add(elapsed))
        .ok_or_else(|| corrupt("run timing out of range"))
}

fn validate_coordinates(samples: &[Sample]) -> TrackingResult<()> {
    let mut last_order: Option<u64> = None;
    for sample in samples {
        if !sample.has_valid_position() {
            return Err(corrupt(format!(
                "sample {} has invalid coordinates",
                sample.order_index
            )));
        }
        if let Some(last) = last_order {
            if sample.order_index <= last {
                return Err(corrupt(format!(
                    "order index {} does not follow {}",
                    sample.order_index, last
                )));
            }
        }
        last_order = Some(sample.order_index);
    }
    Ok(())
}

fn validate_bounds(bounds: &[SegmentBounds], samples: &[Sample]) -> TrackingResult<()> {
    if bounds.is_empty() {
        return Err(corrupt("snapshot has no segments"));
    }
    for (position, b) in bounds.iter().enumerate() {
        if b.index as usize != position {
            return Err(corrupt(format!(
                "segment index {} found at position {}",
                b.index, position
            )));
        }
        if b.end_time.is_none() && position + 1 != bounds.len() {
            return Err(corrupt(format!("segment {} is open but not last", b.index)));
        }
    }
    if let Some(sample) = samples
        .iter()
        .find(|s| s.segment_index as usize >= bounds.len())
    {
        return Err(corrupt(format!(
            "sample {} references missing segment {}",
            sample.order_index, sample.segment_index
        )));
    }
    Ok(())
}

/// Infers segment bounds for snapshots that only carry coordinates.
///
/// Closed segments span their first to last sample; the first segment starts
/// at the run start and the current segment uses its recorded start time.
/// At most one segment past the last sampled one is inferred, and never more
/// segments than there are samples plus one.
fn rebuild_bounds(snapshot: &Snapshot) -> TrackingResult<Vec<SegmentBounds>> {
    let mut spans: BTreeMap<u32, (i64, i64)> = BTreeMap::new();
    for sample in &snapshot.coordinates {
        spans
            .entry(sample.segment_index)
            .and_modify(|(first, last)| {
                *first = (*first).min(sample.timestamp);
                *last = (*last).max(sample.timestamp);
            })
            .or_insert((sample.timestamp, sample.timestamp));
    }

    let last_sampled = spans.keys().next_back().copied();
    let highest = last_sampled
        .into_iter()
        .chain(snapshot.current_segment_index)
        .max()
        .unwrap_or(0);

    let allowed = last_sampled.map_or(0, |index| u64::from(index) + 1);
    if u64::from(highest) > allowed || highest as usize > snapshot.coordinates.len() {
        return Err(corrupt(format!(
            "segment index {} not backed by {} samples",
            highest,
            snapshot.coordinates.len()
        )));
    }

    let mut bounds = Vec::with_capacity(highest as usize + 1);
    let mut previous_end = snapshot.start_time;
    for index in 0..=highest {
        let is_current = snapshot.is_tracking && snapshot.current_segment_index == Some(index);
        let span = spans.get(&index).copied();

        let recorded_start = if index == 0 {
            snapshot.start_time
        } else if is_current {
            snapshot
                .current_segment_start_time
                .or(span.map(|(first, _)| first))
                .unwrap_or(previous_end)
        } else {
            span.map_or(previous_end, |(first, _)| first)
        };
        let start_time = recorded_start.max(previous_end);

        let recorded_end = if is_current {
            None
        } else if index == highest && snapshot.is_paused {
            snapshot.pause_started_at.or(span.map(|(_, last)| last))
        } else {
            span.map(|(_, last)| last)
        };
        let end_time = match recorded_end {
            Some(end) => Some(end.max(start_time)),
            None if is_current => None,
            None => Some(start_time),
        };

        previous_end = end_time.unwrap_or(start_time);
        bounds.push(SegmentBounds {
            index,
            start_time,
            end_time,
        });
    }
    Ok(bounds)
}
