//! Filter chain deciding which raw fixes become samples.
//!
//! Decisions depend only on the fix, the current time and a little state:
//! the last accepted timestamp per source and every timestamp already
//! recorded in the run.

use std::collections::HashSet;

use crate::models::{Fix, Sample, SampleSource};
use crate::settings::FilterSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Stale,
    Inaccurate,
    RateLimited,
    InvalidCoordinates,
    Duplicate,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Stale => "stale",
            DropReason::Inaccurate => "inaccurate",
            DropReason::RateLimited => "rate-limited",
            DropReason::InvalidCoordinates => "invalid-coordinates",
            DropReason::Duplicate => "duplicate",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleFilter {
    settings: FilterSettings,
    last_foreground: Option<i64>,
    last_background: Option<i64>,
    seen_timestamps: HashSet<i64>,
}

impl SampleFilter {
    pub fn new(settings: FilterSettings) -> Self {
        Self {
            settings,
            last_foreground: None,
            last_background: None,
            seen_timestamps: HashSet::new(),
        }
    }

    /// Rebuilds filter state from samples already recorded in a run.
    pub fn rebuild<'a>(
        settings: FilterSettings,
        samples: impl IntoIterator<Item = &'a Sample>,
    ) -> Self {
        let mut filter = Self::new(settings);
        for sample in samples {
            filter.record(sample.source, sample.timestamp);
        }
        filter
    }

    pub fn last_accepted(&self, source: SampleSource) -> Option<i64> {
        match source {
            SampleSource::Foreground => self.last_foreground,
            SampleSource::Background => self.last_background,
        }
    }

    /// Runs the chain in order; the first failing rule wins.
    pub fn check(&self, fix: &Fix, source: SampleSource, now: i64) -> Result<(), DropReason> {
        if source == SampleSource::Background
            && now.saturating_sub(fix.timestamp) > self.settings.background_max_age_ms
        {
            return Err(DropReason::Stale);
        }

        if let Some(accuracy) = fix.accuracy_m {
            if accuracy > self.settings.max_accuracy_m {
                return Err(DropReason::Inaccurate);
            }
        }

        if let Some(last) = self.last_accepted(source) {
            let limited = match source {
                SampleSource::Foreground => {
                    fix.timestamp.saturating_sub(last) < self.settings.foreground_min_interval_ms
                }
                SampleSource::Background => fix.timestamp <= last,
            };
            if limited {
                return Err(DropReason::RateLimited);
            }
        }

        if fix.valid_position().is_none() {
            return Err(DropReason::InvalidCoordinates);
        }

        if self.seen_timestamps.contains(&fix.timestamp) {
            return Err(DropReason::Duplicate);
        }

        Ok(())
    }

    /// Marks a fix as accepted. Call only after it was appended.
    pub fn record(&mut self, source: SampleSource, timestamp: i64) {
        let slot = match source {
            SampleSource::Foreground => &mut self.last_foreground,
            SampleSource::Background => &mut self.last_background,
        };
        *slot = Some(slot.map_or(timestamp, |last| last.max(timestamp)));
        self.seen_timestamps.insert(timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> SampleFilter {
        SampleFilter::new(FilterSettings::default())
    }

    fn accept(filter: &mut SampleFilter, fix: &Fix, source: SampleSource, now: i64) {
        filter.check(fix, source, now).unwrap();
        filter.record(source, fix.timestamp);
    }

    #[test]
    fn test_inaccurate_fix_rejected_regardless_of_state() {
        let filter = filter();
        let fix = Fix::new(47.6, -122.3, 1_000).with_accuracy(40.0);

        assert_eq!(
            filter.check(&fix, SampleSource::Foreground, 1_000),
            Err(DropReason::Inaccurate)
        );
        assert_eq!(
            filter.check(&fix, SampleSource::Background, 1_000),
            Err(DropReason::Inaccurate)
        );
    }

    #[test]
    fn test_accuracy_boundary_is_inclusive() {
        let filter = filter();
        let fix = Fix::new(47.6, -122.3, 1_000).with_accuracy(25.0);
        assert!(filter.check(&fix, SampleSource::Foreground, 1_000).is_ok());
    }

    #[test]
    fn test_staleness_applies_to_background_only() {
        let filter = filter();
        let fix = Fix::new(47.6, -122.3, 1_000);

        assert_eq!(
            filter.check(&fix, SampleSource::Background, 16_001),
            Err(DropReason::Stale)
        );
        assert!(filter.check(&fix, SampleSource::Background, 16_000).is_ok());
        assert!(filter.check(&fix, SampleSource::Foreground, 60_000).is_ok());
    }

    #[test]
    fn test_foreground_rate_limit() {
        let mut filter = filter();
        accept(&mut filter, &Fix::new(47.6, -122.3, 1_000), SampleSource::Foreground, 1_000);

        let too_soon = Fix::new(47.6, -122.3, 1_799);
        assert_eq!(
            filter.check(&too_soon, SampleSource::Foreground, 1_799),
            Err(DropReason::RateLimited)
        );
        let ok = Fix::new(47.6, -122.3, 1_800);
        assert!(filter.check(&ok, SampleSource::Foreground, 1_800).is_ok());
    }

    #[test]
    fn test_extreme_timestamps_are_dropped_not_overflowed() {
        let mut filter = filter();
        let ancient = Fix::new(47.6, -122.3, i64::MIN);
        assert_eq!(
            filter.check(&ancient, SampleSource::Background, 1_000),
            Err(DropReason::Stale)
        );

        accept(&mut filter, &Fix::new(47.6, -122.3, 1_000), SampleSource::Foreground, 1_000);
        assert_eq!(
            filter.check(&ancient, SampleSource::Foreground, 1_000),
            Err(DropReason::RateLimited)
        );

        let mut filter = SampleFilter::new(FilterSettings::default());
        filter.record(SampleSource::Foreground, i64::MIN);
        let far_future = Fix::new(47.6, -122.3, i64::MAX);
        assert!(filter.check(&far_future, SampleSource::Foreground, 0).is_ok());
    }

    #[test]
    fn test_background_allows_catch_up_bursts() {
        let mut filter = filter();
        accept(&mut filter, &Fix::new(47.6, -122.3, 1_000), SampleSource::Background, 5_000);

        // Burst entries 1 ms apart are fine for the background stream.
        let next = Fix::new(47.6, -122.3, 1_001);
        assert!(filter.check(&next, SampleSource::Background, 5_000).is_ok());

        let replay = Fix::new(47.6, -122.3, 1_000);
        assert_eq!(
            filter.check(&replay, SampleSource::Background, 5_000),
            Err(DropReason::RateLimited)
        );
    }

    #[test]
    fn test_streams_are_rate_limited_independently() {
        let mut filter = filter();
        accept(&mut filter, &Fix::new(47.6, -122.3, 5_000), SampleSource::Foreground, 5_000);

        // An older background fix is still new for its own stream.
        let older = Fix::new(47.6, -122.3, 4_000);
        assert!(filter.check(&older, SampleSource::Background, 5_000).is_ok());
    }

    #[test]
    fn test_duplicate_timestamp_across_sources() {
        let mut filter = filter();
        let fix = Fix::new(47.6, -122.3, 2_000);
        accept(&mut filter, &fix, SampleSource::Foreground, 2_000);

        assert_eq!(
            filter.check(&fix, SampleSource::Background, 2_500),
            Err(DropReason::Duplicate)
        );
    }

    #[test]
    fn test_invalid_coordinates_checked_after_rate_limit() {
        let mut filter = filter();
        accept(&mut filter, &Fix::new(47.6, -122.3, 1_000), SampleSource::Foreground, 1_000);

        let bad_and_early = Fix::new(95.0, 0.0, 1_100);
        assert_eq!(
            filter.check(&bad_and_early, SampleSource::Foreground, 1_100),
            Err(DropReason::RateLimited)
        );
        let bad = Fix::new(95.0, 0.0, 3_000);
        assert_eq!(
            filter.check(&bad, SampleSource::Foreground, 3_000),
            Err(DropReason::InvalidCoordinates)
        );
    }

    #[test]
    fn test_rebuild_restores_stream_state() {
        let samples: Vec<Sample> = [(1_000, SampleSource::Foreground), (3_000, SampleSource::Background)]
            .iter()
            .enumerate()
            .map(|(i, (timestamp, source))| Sample {
                latitude: 47.6,
                longitude: -122.3,
                accuracy_m: None,
                altitude_m: None,
                timestamp: *timestamp,
                source: *source,
                segment_index: 0,
                order_index: i as u64,
            })
            .collect();

        let filter = SampleFilter::rebuild(FilterSettings::default(), &samples);
        assert_eq!(filter.last_accepted(SampleSource::Foreground), Some(1_000));
        assert_eq!(filter.last_accepted(SampleSource::Background), Some(3_000));
        assert_eq!(
            filter.check(&Fix::new(47.6, -122.3, 3_000), SampleSource::Foreground, 3_000),
            Err(DropReason::Duplicate)
        );
    }
}
