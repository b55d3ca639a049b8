//! Ordered snapshot writes for the live run.
//!
//! A single worker task owns the store handle and applies commands in the
//! order they were queued, so a periodic write queued before a delete can
//! never bring a discarded snapshot back.

use std::sync::Arc;

use log::{error, info};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::models::Snapshot;
use crate::persistence::{SnapshotStore, CURRENT_TRACKING_KEY};

use super::error::{TrackingError, TrackingResult};

type Ack = oneshot::Sender<TrackingResult<()>>;

enum SnapshotCommand {
    Write(Box<Snapshot>, Option<Ack>),
    Delete(Option<Ack>),
}

#[derive(Clone)]
pub struct SnapshotWriter {
    sender: mpsc::UnboundedSender<SnapshotCommand>,
    worker: Arc<JoinHandle<()>>,
}

impl SnapshotWriter {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn(store: Arc<dyn SnapshotStore>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(writer_loop(store, receiver));
        Self {
            sender,
            worker: Arc::new(worker),
        }
    }

    /// Queues a write without waiting for it.
    pub fn queue_write(&self, snapshot: Snapshot) {
        self.send(SnapshotCommand::Write(Box::new(snapshot), None));
    }

    pub async fn write_and_wait(&self, snapshot: Snapshot) -> TrackingResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(SnapshotCommand::Write(Box::new(snapshot), Some(ack_tx)));
        wait(ack_rx).await
    }

    /// Deletes the snapshot after every previously queued write has landed.
    pub async fn delete_and_wait(&self) -> TrackingResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(SnapshotCommand::Delete(Some(ack_tx)));
        wait(ack_rx).await
    }

    fn send(&self, command: SnapshotCommand) {
        if self.sender.send(command).is_err() {
            error!("Snapshot writer is gone; dropping command");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }
}

async fn wait(ack_rx: oneshot::Receiver<TrackingResult<()>>) -> TrackingResult<()> {
    ack_rx.await.unwrap_or_else(|_| {
        Err(TrackingError::SnapshotWriteFailed(
            "snapshot writer stopped before acknowledging".into(),
        ))
    })
}

async fn writer_loop(
    store: Arc<dyn SnapshotStore>,
    mut receiver: mpsc::UnboundedReceiver<SnapshotCommand>,
) {
    while let Some(command) = receiver.recv().await {
        let (result, ack) = match command {
            SnapshotCommand::Write(snapshot, ack) => {
                let result = store.write(CURRENT_TRACKING_KEY, &snapshot).await;
                (result, ack)
            }
            SnapshotCommand::Delete(ack) => (store.delete(CURRENT_TRACKING_KEY).await, ack),
        };

        let result = result.map_err(|err| TrackingError::SnapshotWriteFailed(err.to_string()));
        if let Err(err) = &result {
            error!("{err}");
        }
        if let Some(ack) = ack {
            let _ = ack.send(result);
        }
    }

    info!("Snapshot writer shutting down");
}
