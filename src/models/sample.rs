use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Which watcher delivered a fix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SampleSource {
    Foreground,
    Background,
}

impl SampleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleSource::Foreground => "foreground",
            SampleSource::Background => "background",
        }
    }
}

/// One raw reading from the platform location API.
///
/// Coordinates are optional because platforms occasionally deliver fixes
/// without a position (e.g. a heartbeat with only accuracy).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub altitude_m: Option<f64>,
    pub timestamp: i64,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            accuracy_m: None,
            altitude_m: None,
            timestamp,
        }
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }

    pub fn with_altitude(mut self, altitude_m: f64) -> Self {
        self.altitude_m = Some(altitude_m);
        self
    }

    /// Returns the position when both coordinates are present and in range.
    pub fn valid_position(&self) -> Option<(f64, f64)> {
        let (lat, lon) = (self.latitude?, self.longitude?);
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        if lat.abs() > 90.0 || lon.abs() > 180.0 {
            return None;
        }
        // (0, 0) is what a cold receiver reports before it has a position.
        if lat == 0.0 && lon == 0.0 {
            return None;
        }
        Some((lat, lon))
    }
}

/// An accepted fix, bound to the segment it was appended to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
    pub altitude_m: Option<f64>,
    pub timestamp: i64,
    pub source: SampleSource,
    pub segment_index: u32,
    pub order_index: u64,
}

impl Sample {
    pub fn has_valid_position(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }

    /// Great-circle distance in meters.
    pub fn distance_to(&self, other: &Sample) -> f64 {
        haversine_m(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_one_degree_longitude_at_equator() {
        let dist = haversine_m(0.0, 0.0, 0.0, 1.0);
        assert!((dist - 111_195.0).abs() < 200.0);
    }

    #[test]
    fn test_valid_position_rejects_bad_coordinates() {
        assert!(Fix::new(47.6, -122.3, 0).valid_position().is_some());
        assert!(Fix::new(91.0, 0.5, 0).valid_position().is_none());
        assert!(Fix::new(10.0, -180.5, 0).valid_position().is_none());
        assert!(Fix::new(0.0, 0.0, 0).valid_position().is_none());
        assert!(Fix::new(f64::NAN, 1.0, 0).valid_position().is_none());

        let missing = Fix {
            latitude: None,
            ..Fix::new(1.0, 1.0, 0)
        };
        assert!(missing.valid_position().is_none());
    }

    #[test]
    fn test_equator_and_meridian_are_valid_individually() {
        assert!(Fix::new(0.0, 12.5, 0).valid_position().is_some());
        assert!(Fix::new(51.5, 0.0, 0).valid_position().is_some());
    }
}
