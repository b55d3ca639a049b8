//! Simulated location service that jogs east with noisy fixes.
//!
//! Foreground fixes arrive once per second; background fixes arrive in bursts
//! that replay the last few seconds, so both streams overlap the way real
//! platform watchers do.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::models::Fix;

use super::{FixSink, LocationService, PermissionStatus, Subscription};

const FOREGROUND_INTERVAL_MS: u64 = 1_000;
const BACKGROUND_BURST_MS: u64 = 5_000;
const BACKGROUND_BURST_LEN: i64 = 4;
// Roughly 3 m/s along the equator-scaled longitude axis.
const STEP_DEG: f64 = 0.000_027;

struct Route {
    latitude: f64,
    longitude: f64,
    drift: f64,
    rng: StdRng,
}

impl Route {
    fn position_at(&mut self) -> (f64, f64, f64) {
        let white = self.rng.gen_range(-1.0..1.0);
        // Brownian drift on the latitude axis keeps the track from being a ruler line.
        self.drift = (self.drift + white * 0.000_002).clamp(-0.000_01, 0.000_01);
        self.latitude += self.drift;
        self.longitude += STEP_DEG;

        let accuracy = if self.rng.gen_bool(0.1) {
            self.rng.gen_range(26.0..60.0)
        } else {
            self.rng.gen_range(3.0..15.0)
        };
        (self.latitude, self.longitude, accuracy)
    }
}

#[derive(Clone)]
pub struct SimulatedLocation {
    route: Arc<Mutex<Route>>,
    permission: Arc<AtomicBool>,
    services: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
}

impl SimulatedLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            route: Arc::new(Mutex::new(Route {
                latitude,
                longitude,
                drift: 0.0,
                rng: StdRng::from_entropy(),
            })),
            permission: Arc::new(AtomicBool::new(true)),
            services: Arc::new(AtomicBool::new(true)),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    pub fn set_services_enabled(&self, enabled: bool) {
        self.services.store(enabled, Ordering::SeqCst);
    }

    fn next_fix(&self, timestamp: i64) -> Fix {
        let mut route = match self.route.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (lat, lon, accuracy) = route.position_at();
        Fix::new(lat, lon, timestamp)
            .with_accuracy(accuracy)
            .with_altitude(20.0)
    }

    fn now_whole_second(&self) -> i64 {
        let now = self.clock.now_ms();
        now - now.rem_euclid(1_000)
    }

    fn spawn_watch(&self, sink: FixSink, period_ms: u64, burst: i64) -> SimulatedWatch {
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let this = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(period_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !this.services.load(Ordering::SeqCst) {
                            sink.send_error("no location provider available");
                            continue;
                        }
                        let newest = this.now_whole_second();
                        for back in (0..burst).rev() {
                            let fix = this.next_fix(newest - back * 1_000);
                            if !sink.send_fix(fix) {
                                return;
                            }
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });

        SimulatedWatch {
            cancel_token,
            handle,
        }
    }
}

#[async_trait]
impl LocationService for SimulatedLocation {
    async fn check_permission(&self) -> PermissionStatus {
        if self.permission.load(Ordering::SeqCst) {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        }
    }

    async fn request_permission(&self) -> PermissionStatus {
        self.check_permission().await
    }

    async fn services_enabled(&self) -> bool {
        self.services.load(Ordering::SeqCst)
    }

    async fn current_fix(&self) -> Option<Fix> {
        if !self.services.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.next_fix(self.clock.now_ms()))
    }

    async fn watch_foreground(&self, sink: FixSink) -> Result<Box<dyn Subscription>> {
        if !self.services.load(Ordering::SeqCst) {
            bail!("location services unavailable");
        }
        info!("simulated foreground watch started");
        Ok(Box::new(self.spawn_watch(sink, FOREGROUND_INTERVAL_MS, 1)))
    }

    async fn watch_background(&self, sink: FixSink) -> Result<Box<dyn Subscription>> {
        if !self.services.load(Ordering::SeqCst) {
            bail!("location services unavailable");
        }
        info!("simulated background watch started");
        Ok(Box::new(self.spawn_watch(
            sink,
            BACKGROUND_BURST_MS,
            BACKGROUND_BURST_LEN,
        )))
    }
}

struct SimulatedWatch {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

#[async_trait]
impl Subscription for SimulatedWatch {
    async fn cancel(self: Box<Self>) {
        self.cancel_token.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::WatchEvent;
    use crate::models::SampleSource;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_foreground_watch_delivers_tagged_fixes() {
        let location = SimulatedLocation::new(47.6, -122.3);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let sub = location
            .watch_foreground(FixSink::new(SampleSource::Foreground, tx))
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            WatchEvent::Fix(source, fix) => {
                assert_eq!(source, SampleSource::Foreground);
                assert!(fix.valid_position().is_some());
                assert_eq!(fix.timestamp % 1_000, 0);
            }
            other => panic!("unexpected event {other:?}"),
        }

        sub.cancel().await;
    }

    #[tokio::test]
    async fn test_watch_refused_when_services_off() {
        let location = SimulatedLocation::new(47.6, -122.3);
        location.set_services_enabled(false);
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = location
            .watch_background(FixSink::new(SampleSource::Background, tx))
            .await;
        assert!(result.is_err());
        assert!(!location.services_enabled().await);
    }
}
