//! Interface to the platform location API.

pub mod simulated;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::{Fix, SampleSource};

pub use simulated::SimulatedLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

impl PermissionStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionStatus::Granted)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Fix(SampleSource, Fix),
    Error(SampleSource, String),
}

/// Handed to a watcher; every event it sends is tagged with the watcher's source.
#[derive(Debug, Clone)]
pub struct FixSink {
    source: SampleSource,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl FixSink {
    pub fn new(source: SampleSource, tx: mpsc::UnboundedSender<WatchEvent>) -> Self {
        Self { source, tx }
    }

    pub fn source(&self) -> SampleSource {
        self.source
    }

    /// Returns `false` once the receiving side is gone.
    pub fn send_fix(&self, fix: Fix) -> bool {
        self.tx.send(WatchEvent::Fix(self.source, fix)).is_ok()
    }

    pub fn send_error(&self, message: impl Into<String>) -> bool {
        self.tx
            .send(WatchEvent::Error(self.source, message.into()))
            .is_ok()
    }
}

/// A running watcher. Dropping it without `cancel` leaks the platform watch.
#[async_trait]
pub trait Subscription: Send {
    async fn cancel(self: Box<Self>);
}

#[async_trait]
pub trait LocationService: Send + Sync {
    async fn check_permission(&self) -> PermissionStatus;

    async fn request_permission(&self) -> PermissionStatus;

    async fn services_enabled(&self) -> bool;

    async fn current_fix(&self) -> Option<Fix>;

    /// Actively polled updates while the app is in the foreground.
    async fn watch_foreground(&self, sink: FixSink) -> Result<Box<dyn Subscription>>;

    /// Platform-scheduled updates; may arrive late and in bursts.
    async fn watch_background(&self, sink: FixSink) -> Result<Box<dyn Subscription>>;
}
