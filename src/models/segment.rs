use serde::{Deserialize, Serialize};

use super::sample::Sample;

/// Contiguous span of samples recorded between a resume and the next pause.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub index: u32,
    pub coordinates: Vec<Sample>,
    pub start_time: i64,
    pub end_time: Option<i64>,
}

impl Segment {
    pub fn open(index: u32, start_time: i64) -> Self {
        Self {
            index,
            coordinates: Vec::new(),
            start_time,
            end_time: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn close(&mut self, end_time: i64) {
        if self.end_time.is_none() {
            self.end_time = Some(end_time.max(self.start_time));
        }
    }

    /// Path length in meters over consecutive coordinates.
    pub fn distance_m(&self) -> f64 {
        self.coordinates
            .windows(2)
            .map(|pair| pair[0].distance_to(&pair[1]))
            .sum()
    }

    /// Duration of a closed segment; `None` while it is still open.
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time.map(|end| end - self.start_time)
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.duration_ms().map(|ms| ms / 1000)
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.coordinates.iter().map(|sample| sample.timestamp).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SampleSource;

    fn sample(lat: f64, lon: f64, timestamp: i64) -> Sample {
        Sample {
            latitude: lat,
            longitude: lon,
            accuracy_m: None,
            altitude_m: None,
            timestamp,
            source: SampleSource::Foreground,
            segment_index: 0,
            order_index: 0,
        }
    }

    #[test]
    fn test_close_is_sticky() {
        let mut segment = Segment::open(0, 1_000);
        assert!(segment.is_open());
        assert_eq!(segment.duration_ms(), None);

        segment.close(5_000);
        segment.close(9_000);
        assert_eq!(segment.end_time, Some(5_000));
        assert_eq!(segment.duration_secs(), Some(4));
    }

    #[test]
    fn test_close_never_precedes_start() {
        let mut segment = Segment::open(3, 10_000);
        segment.close(9_000);
        assert_eq!(segment.duration_ms(), Some(0));
    }

    #[test]
    fn test_distance_sums_consecutive_legs() {
        let mut segment = Segment::open(0, 0);
        segment.coordinates.push(sample(0.0, 1.0, 1));
        segment.coordinates.push(sample(0.0, 1.001, 2));
        segment.coordinates.push(sample(0.0, 1.002, 3));

        let distance = segment.distance_m();
        assert!((distance - 222.4).abs() < 1.0, "got {distance}");
    }
}
