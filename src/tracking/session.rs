use serde::{Deserialize, Serialize};

use crate::models::{Fix, Run, Sample, SampleSource, Segment};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    Tracking,
    Paused,
    Stopped,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Tracking => "tracking",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
        }
    }
}

/// Why an append was refused by the session itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendError {
    NotTracking,
    MissingPosition,
}

/// The live run. All times are epoch milliseconds supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSession {
    pub(crate) id: String,
    pub(crate) start_time: i64,
    pub(crate) state: SessionState,
    pub(crate) segments: Vec<Segment>,
    pub(crate) total_paused_ms: u64,
    pub(crate) pause_started_at: Option<i64>,
    /// Running time excluding pauses; frozen while paused.
    pub(crate) elapsed_ms: u64,
    pub(crate) next_order_index: u64,
}

impl RunSession {
    pub fn start(id: String, now: i64) -> Self {
        Self {
            id,
            start_time: now,
            state: SessionState::Tracking,
            segments: vec![Segment::open(0, now)],
            total_paused_ms: 0,
            pause_started_at: None,
            elapsed_ms: 0,
            next_order_index: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn total_paused_ms(&self) -> u64 {
        self.total_paused_ms
    }

    pub fn pause_started_at(&self) -> Option<i64> {
        self.pause_started_at
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn is_tracking(&self) -> bool {
        self.state == SessionState::Tracking
    }

    /// Index of the segment accepting samples; only set while tracking.
    pub fn current_segment_index(&self) -> Option<u32> {
        if !self.is_tracking() {
            return None;
        }
        self.segments
            .last()
            .filter(|segment| segment.is_open())
            .map(|segment| segment.index)
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.segments.iter().flat_map(|s| s.coordinates.iter())
    }

    pub fn sample_count(&self) -> usize {
        self.segments.iter().map(|s| s.coordinates.len()).sum()
    }

    pub fn distance_m(&self) -> f64 {
        self.segments.iter().map(Segment::distance_m).sum()
    }

    /// Recomputes the cached elapsed time. No-op unless tracking.
    pub fn tick(&mut self, now: i64) {
        if self.state == SessionState::Tracking {
            let paused = i64::try_from(self.total_paused_ms).unwrap_or(i64::MAX);
            let running = now.saturating_sub(self.start_time).saturating_sub(paused);
            // Never run backwards if the wall clock steps back.
            self.elapsed_ms = self.elapsed_ms.max(running.max(0) as u64);
        }
    }

    /// Closes the open segment and freezes elapsed time.
    ///
    /// Returns `false` when the session was not tracking, in which case
    /// nothing changes.
    pub fn pause(&mut self, now: i64) -> bool {
        if self.state != SessionState::Tracking {
            return false;
        }
        self.tick(now);
        if let Some(segment) = self.segments.last_mut() {
            segment.close(now);
        }
        self.pause_started_at = Some(now);
        self.state = SessionState::Paused;
        true
    }

    /// Opens the next segment. Returns its index, or `None` when the session
    /// was not paused.
    pub fn resume(&mut self, now: i64) -> Option<u32> {
        if self.state != SessionState::Paused {
            return None;
        }
        let paused_since = self.pause_started_at.take().unwrap_or(now);
        self.total_paused_ms = self
            .total_paused_ms
            .saturating_add(now.saturating_sub(paused_since).max(0) as u64);

        let next_index = self.segments.len() as u32;
        let start = self
            .segments
            .last()
            .and_then(|segment| segment.end_time)
            .map_or(now, |end| end.max(now));
        self.segments.push(Segment::open(next_index, start));
        self.state = SessionState::Tracking;
        Some(next_index)
    }

    /// Appends an already-filtered fix to the open segment.
    pub fn append(&mut self, fix: &Fix, source: SampleSource) -> Result<&Sample, AppendError> {
        let segment_index = self
            .current_segment_index()
            .ok_or(AppendError::NotTracking)?;
        let (latitude, longitude) = fix.valid_position().ok_or(AppendError::MissingPosition)?;

        let sample = Sample {
            latitude,
            longitude,
            accuracy_m: fix.accuracy_m,
            altitude_m: fix.altitude_m,
            timestamp: fix.timestamp,
            source,
            segment_index,
            order_index: self.next_order_index,
        };
        self.next_order_index += 1;

        let segment = self
            .segments
            .last_mut()
            .ok_or(AppendError::NotTracking)?;
        segment.coordinates.push(sample);
        segment
            .coordinates
            .last()
            .ok_or(AppendError::NotTracking)
    }

    /// Pauses if needed and freezes the session into a finished run.
    pub fn finish(mut self, now: i64) -> Run {
        self.pause(now);
        self.state = SessionState::Stopped;
        let end_time = self
            .segments
            .last()
            .and_then(|segment| segment.end_time)
            .unwrap_or(now);
        Run {
            id: self.id,
            start_time: self.start_time,
            end_time,
            segments: self.segments,
            total_paused_ms: self.total_paused_ms,
            elapsed_ms: self.elapsed_ms,
        }
    }
}
