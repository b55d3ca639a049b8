use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::{Sample, Segment};

/// A finished run, frozen at stop-and-review time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub segments: Vec<Segment>,
    pub total_paused_ms: u64,
    pub elapsed_ms: u64,
}

impl Run {
    pub fn distance_m(&self) -> f64 {
        self.segments.iter().map(Segment::distance_m).sum()
    }

    pub fn sample_count(&self) -> usize {
        self.segments.iter().map(|s| s.coordinates.len()).sum()
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_ms / 1000
    }

    /// Samples across all segments in acceptance order.
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.segments.iter().flat_map(|s| s.coordinates.iter())
    }

    pub fn average_pace_secs_per_km(&self) -> Option<f64> {
        let km = self.distance_m() / 1000.0;
        if km <= f64::EPSILON {
            return None;
        }
        Some(self.elapsed_ms as f64 / 1000.0 / km)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.start_time).single()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            elapsed_ms: self.elapsed_ms,
            total_paused_ms: self.total_paused_ms,
            distance_m: self.distance_m(),
            segment_count: self.segments.len() as u32,
            sample_count: self.sample_count() as u64,
        }
    }
}

/// Projection of an archived run for history lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub elapsed_ms: u64,
    pub total_paused_ms: u64,
    pub distance_m: f64,
    pub segment_count: u32,
    pub sample_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SampleSource;

    fn run_with_points(points: &[(f64, f64)], elapsed_ms: u64) -> Run {
        let mut segment = Segment::open(0, 0);
        for (i, (lat, lon)) in points.iter().enumerate() {
            segment.coordinates.push(Sample {
                latitude: *lat,
                longitude: *lon,
                accuracy_m: Some(5.0),
                altitude_m: None,
                timestamp: i as i64 * 1000,
                source: SampleSource::Foreground,
                segment_index: 0,
                order_index: i as u64,
            });
        }
        segment.close(elapsed_ms as i64);
        Run {
            id: "run".into(),
            start_time: 0,
            end_time: elapsed_ms as i64,
            segments: vec![segment],
            total_paused_ms: 0,
            elapsed_ms,
        }
    }

    #[test]
    fn test_pace_undefined_without_distance() {
        let run = run_with_points(&[(10.0, 10.0)], 60_000);
        assert_eq!(run.average_pace_secs_per_km(), None);
    }

    #[test]
    fn test_pace_for_one_kilometre() {
        // ~1 km along the equator
        let run = run_with_points(&[(0.0, 1.0), (0.0, 1.008_993)], 300_000);
        let pace = run.average_pace_secs_per_km().unwrap();
        assert!((pace - 300.0).abs() < 1.0, "pace {pace}");
    }

    #[test]
    fn test_summary_counts() {
        let run = run_with_points(&[(0.0, 1.0), (0.0, 1.001), (0.0, 1.002)], 3_000);
        let summary = run.summary();
        assert_eq!(summary.segment_count, 1);
        assert_eq!(summary.sample_count, 3);
        assert_eq!(summary.elapsed_ms, 3_000);
    }
}
