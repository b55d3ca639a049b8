use serde::Serialize;

use crate::models::Run;

use super::session::{RunSession, SessionState};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStatus {
    pub state: SessionState,
    pub run_id: Option<String>,
    pub started_at: Option<i64>,
    pub elapsed_ms: u64,
    pub total_paused_ms: u64,
    pub segment_count: u32,
    pub sample_count: u64,
    pub distance_m: f64,
    pub signal_lost: bool,
}

impl TrackingStatus {
    pub fn idle(signal_lost: bool) -> Self {
        Self {
            state: SessionState::Idle,
            run_id: None,
            started_at: None,
            elapsed_ms: 0,
            total_paused_ms: 0,
            segment_count: 0,
            sample_count: 0,
            distance_m: 0.0,
            signal_lost,
        }
    }

    pub fn of_session(session: &RunSession, signal_lost: bool) -> Self {
        Self {
            state: session.state(),
            run_id: Some(session.id().to_string()),
            started_at: Some(session.start_time()),
            elapsed_ms: session.elapsed_ms(),
            total_paused_ms: session.total_paused_ms(),
            segment_count: session.segments().len() as u32,
            sample_count: session.sample_count() as u64,
            distance_m: session.distance_m(),
            signal_lost,
        }
    }

    pub fn of_finished(run: &Run) -> Self {
        Self {
            state: SessionState::Stopped,
            run_id: Some(run.id.clone()),
            started_at: Some(run.start_time),
            elapsed_ms: run.elapsed_ms,
            total_paused_ms: run.total_paused_ms,
            segment_count: run.segments.len() as u32,
            sample_count: run.sample_count() as u64,
            distance_m: run.distance_m(),
            signal_lost: false,
        }
    }
}

/// Broadcast to every subscriber of the controller.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum TrackingEvent {
    StateChanged(TrackingStatus),
    Heartbeat(TrackingStatus),
    SignalLost,
    SignalRestored,
    #[serde(rename_all = "camelCase")]
    RunCompleted { run_id: String },
    #[serde(rename_all = "camelCase")]
    RunSaved { run_id: String },
}
