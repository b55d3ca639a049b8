//! Persisted form of an in-progress run, used for crash recovery.

use serde::{Deserialize, Serialize};

use super::Sample;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Bounds of a segment, persisted so recovery does not have to guess them
/// from sample timestamps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentBounds {
    pub index: u32,
    pub start_time: i64,
    pub end_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    pub run_id: String,
    pub start_time: i64,
    pub coordinates: Vec<Sample>,
    pub is_tracking: bool,
    pub is_paused: bool,
    pub total_paused_ms: u64,
    pub pause_started_at: Option<i64>,
    pub current_segment_index: Option<u32>,
    pub current_segment_start_time: Option<i64>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub segments: Vec<SegmentBounds>,
    pub saved_at: i64,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Snapshot {
    /// True when the snapshot describes a run that was never stopped.
    pub fn is_in_progress(&self) -> bool {
        self.is_tracking || self.is_paused
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_without_bounds_still_parses() {
        let raw = r#"{
            "runId": "abc",
            "startTime": 0,
            "coordinates": [],
            "isTracking": true,
            "isPaused": false,
            "totalPausedMs": 0,
            "pauseStartedAt": null,
            "currentSegmentIndex": 0,
            "currentSegmentStartTime": 0,
            "elapsedMs": 1200,
            "savedAt": 1300
        }"#;

        let snapshot = Snapshot::from_json(raw).unwrap();
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.current_segment_index, Some(0));
        assert!(snapshot.segments.is_empty());
        assert!(snapshot.is_in_progress());
    }

    #[test]
    fn test_truncated_payload_is_an_error() {
        assert!(Snapshot::from_json(r#"{"runId": "abc", "startTi"#).is_err());
    }
}
