//! GPS availability polling and the auto-pause it drives.

use log::warn;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::location::LocationService;

use super::controller::TrackingController;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalChange {
    Lost,
    Restored,
}

/// Edge detector over successive availability probes.
#[derive(Debug, Clone)]
pub struct SignalMonitor {
    good: bool,
}

impl Default for SignalMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalMonitor {
    /// Starts in the "good" state; a run only begins once location is usable.
    pub fn new() -> Self {
        Self { good: true }
    }

    pub fn is_good(&self) -> bool {
        self.good
    }

    pub fn observe(&mut self, good: bool) -> Option<SignalChange> {
        if good == self.good {
            return None;
        }
        self.good = good;
        Some(if good {
            SignalChange::Restored
        } else {
            SignalChange::Lost
        })
    }
}

pub async fn probe(location: &dyn LocationService) -> bool {
    location.check_permission().await.is_granted() && location.services_enabled().await
}

pub(crate) async fn health_loop(
    controller: TrackingController,
    poll_every: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = interval(poll_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut monitor = SignalMonitor::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let good = probe(controller.location().as_ref()).await;
                match monitor.observe(good) {
                    Some(SignalChange::Lost) => {
                        log_warn!("GPS signal lost");
                        controller.mark_signal_lost();
                        // Stop may already hold the transition lock and be
                        // waiting for this task to exit.
                        tokio::select! {
                            result = controller.auto_pause() => {
                                if let Err(err) = result {
                                    warn!("Auto-pause after signal loss failed: {err}");
                                }
                            }
                            _ = cancel_token.cancelled() => break,
                        }
                    }
                    Some(SignalChange::Restored) => {
                        log_info!("GPS signal restored");
                        controller.mark_signal_restored();
                    }
                    None => {}
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_fire_once_per_edge() {
        let mut monitor = SignalMonitor::new();
        assert_eq!(monitor.observe(true), None);
        assert_eq!(monitor.observe(false), Some(SignalChange::Lost));
        assert_eq!(monitor.observe(false), None);
        assert!(!monitor.is_good());
        assert_eq!(monitor.observe(true), Some(SignalChange::Restored));
        assert_eq!(monitor.observe(true), None);
    }

    #[tokio::test]
    async fn test_probe_requires_permission_and_services() {
        let location = crate::location::SimulatedLocation::new(47.6, -122.3);
        assert!(probe(&location).await);

        location.set_services_enabled(false);
        assert!(!probe(&location).await);

        location.set_services_enabled(true);
        location.set_permission(false);
        assert!(!probe(&location).await);
    }
}
