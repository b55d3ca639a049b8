use log::info;
use tokio::sync::{mpsc, Mutex};

use crate::location::{FixSink, LocationService, Subscription, WatchEvent};
use crate::models::SampleSource;

use super::error::{TrackingError, TrackingResult};

/// The foreground and background watch subscriptions of the live run.
///
/// Start and stop hold the same lock for their whole duration, so a start
/// never overlaps a stop that is still cancelling subscriptions.
pub struct WatcherSet {
    subscriptions: Mutex<Vec<(SampleSource, Box<dyn Subscription>)>>,
}

impl Default for WatcherSet {
    fn default() -> Self {
        Self::new()
    }
}

impl WatcherSet {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Starts both watchers. Either both run afterwards or neither does.
    pub async fn start(
        &self,
        location: &dyn LocationService,
        events: &mpsc::UnboundedSender<WatchEvent>,
    ) -> TrackingResult<()> {
        let mut guard = self.subscriptions.lock().await;
        if !guard.is_empty() {
            return Ok(());
        }

        let foreground = location
            .watch_foreground(FixSink::new(SampleSource::Foreground, events.clone()))
            .await
            .map_err(|err| TrackingError::WatcherStartFailed(format!("foreground: {err:#}")))?;

        let background = match location
            .watch_background(FixSink::new(SampleSource::Background, events.clone()))
            .await
        {
            Ok(subscription) => subscription,
            Err(err) => {
                foreground.cancel().await;
                return Err(TrackingError::WatcherStartFailed(format!(
                    "background: {err:#}"
                )));
            }
        };

        guard.push((SampleSource::Foreground, foreground));
        guard.push((SampleSource::Background, background));
        info!("Location watchers started");
        Ok(())
    }

    pub async fn stop(&self) {
        let mut guard = self.subscriptions.lock().await;
        if guard.is_empty() {
            return;
        }
        for (source, subscription) in guard.drain(..) {
            subscription.cancel().await;
            info!("Stopped {} watcher", source.as_str());
        }
    }
}
