use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::{error, info, warn};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    clock::Clock,
    location::{LocationService, WatchEvent},
    models::{Fix, Run, RunSummary, Sample, SampleSource, Snapshot},
    persistence::{RunArchive, SnapshotStore, StoreError, CURRENT_TRACKING_KEY},
    settings::TrackingSettings,
};

use super::{
    error::{TrackingError, TrackingResult},
    health::health_loop,
    persistence::SnapshotWriter,
    pipeline::SampleFilter,
    recovery::{capture_snapshot, restore_session},
    session::{RunSession, SessionState},
    status::{TrackingEvent, TrackingStatus},
    watchers::WatcherSet,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

const EVENT_CAPACITY: usize = 64;

struct ActiveRun {
    session: RunSession,
    filter: SampleFilter,
}

/// Background tasks that live exactly as long as a session does.
struct RunTasks {
    cancel_token: CancellationToken,
    fix_tx: mpsc::UnboundedSender<WatchEvent>,
    handles: Vec<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct TrackingController {
    active: Arc<Mutex<Option<ActiveRun>>>,
    /// Serializes start, pause, resume, stop and quit.
    op_lock: Arc<Mutex<()>>,
    tasks: Arc<Mutex<Option<RunTasks>>>,
    watchers: Arc<WatcherSet>,
    location: Arc<dyn LocationService>,
    snapshots: Arc<dyn SnapshotStore>,
    archive: Arc<dyn RunArchive>,
    writer: SnapshotWriter,
    clock: Arc<dyn Clock>,
    settings: Arc<TrackingSettings>,
    signal_lost: Arc<AtomicBool>,
    events: broadcast::Sender<TrackingEvent>,
}

impl TrackingController {
    /// Must be called from within a tokio runtime.
    pub fn new(
        location: Arc<dyn LocationService>,
        snapshots: Arc<dyn SnapshotStore>,
        archive: Arc<dyn RunArchive>,
        clock: Arc<dyn Clock>,
        settings: TrackingSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            active: Arc::new(Mutex::new(None)),
            op_lock: Arc::new(Mutex::new(())),
            tasks: Arc::new(Mutex::new(None)),
            watchers: Arc::new(WatcherSet::new()),
            writer: SnapshotWriter::spawn(snapshots.clone()),
            location,
            snapshots,
            archive,
            clock,
            settings: Arc::new(settings),
            signal_lost: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.events.subscribe()
    }

    pub(crate) fn location(&self) -> &Arc<dyn LocationService> {
        &self.location
    }

    pub async fn status(&self) -> TrackingStatus {
        let now = self.clock.now_ms();
        let mut guard = self.active.lock().await;
        match guard.as_mut() {
            Some(run) => {
                run.session.tick(now);
                TrackingStatus::of_session(&run.session, self.is_signal_lost())
            }
            None => TrackingStatus::idle(self.is_signal_lost()),
        }
    }

    pub fn is_signal_lost(&self) -> bool {
        self.signal_lost.load(Ordering::SeqCst)
    }

    pub async fn start(&self) -> TrackingResult<TrackingStatus> {
        let _op = self.op_lock.lock().await;
        if self.active.lock().await.is_some() {
            return Err(TrackingError::AlreadyActive);
        }
        self.ensure_location_available().await?;

        let (session_id, snapshot) = {
            let mut guard = self.active.lock().await;
            let now = self.clock.now_ms();
            let session = RunSession::start(Uuid::new_v4().to_string(), now);
            let snapshot = capture_snapshot(&session, now);
            let session_id = session.id().to_string();
            *guard = Some(ActiveRun {
                session,
                filter: SampleFilter::new(self.settings.filter.clone()),
            });
            (session_id, snapshot)
        };

        if let Err(err) = self.writer.write_and_wait(snapshot).await {
            warn!("Continuing run {session_id} without initial snapshot: {err}");
        }

        let (fix_tx, fix_rx) = mpsc::unbounded_channel();
        if let Err(err) = self.watchers.start(self.location.as_ref(), &fix_tx).await {
            error!("Rolling back run {session_id}: {err}");
            self.watchers.stop().await;
            self.active.lock().await.take();
            if let Err(delete_err) = self.writer.delete_and_wait().await {
                warn!("Failed to discard snapshot of rolled back run: {delete_err}");
            }
            return Err(err);
        }

        self.spawn_tasks(fix_tx, fix_rx).await;
        self.signal_lost.store(false, Ordering::SeqCst);

        if self.settings.seed_with_current_fix {
            if let Some(fix) = self.location.current_fix().await {
                self.ingest_fix(SampleSource::Foreground, fix).await;
            }
        }

        info!("Started run {session_id}");
        Ok(self.emit_state_changed().await)
    }

    pub async fn pause(&self) -> TrackingResult<TrackingStatus> {
        let _op = self.op_lock.lock().await;
        self.pause_locked().await
    }

    /// Pause triggered by the health monitor. Same transition as a user pause.
    pub(crate) async fn auto_pause(&self) -> TrackingResult<()> {
        let _op = self.op_lock.lock().await;
        let tracking = self
            .active
            .lock()
            .await
            .as_ref()
            .map(|run| run.session.is_tracking())
            .unwrap_or(false);
        if tracking {
            self.pause_locked().await?;
            info!("Run auto-paused after signal loss");
        }
        Ok(())
    }

    async fn pause_locked(&self) -> TrackingResult<TrackingStatus> {
        let snapshot = {
            let mut guard = self.active.lock().await;
            let run = guard.as_mut().ok_or(TrackingError::NoActiveSession)?;
            if run.session.state() != SessionState::Tracking {
                return Ok(TrackingStatus::of_session(&run.session, self.is_signal_lost()));
            }
            let now = self.clock.now_ms();
            run.session.pause(now);
            capture_snapshot(&run.session, now)
        };

        self.watchers.stop().await;
        self.write_transition_snapshot(snapshot).await;
        Ok(self.emit_state_changed().await)
    }

    pub async fn resume(&self) -> TrackingResult<TrackingStatus> {
        let _op = self.op_lock.lock().await;
        {
            let guard = self.active.lock().await;
            let run = guard.as_ref().ok_or(TrackingError::NoActiveSession)?;
            if run.session.state() == SessionState::Tracking {
                return Ok(TrackingStatus::of_session(&run.session, self.is_signal_lost()));
            }
        }

        self.ensure_location_available().await?;

        let fix_tx = self.tasks.lock().await.as_ref().map(|tasks| tasks.fix_tx.clone());
        let fix_tx = match fix_tx {
            Some(tx) => tx,
            None => {
                // Tasks are always running alongside a session; restart them if
                // a previous teardown was interrupted.
                let (tx, rx) = mpsc::unbounded_channel();
                self.spawn_tasks(tx.clone(), rx).await;
                tx
            }
        };
        self.watchers.start(self.location.as_ref(), &fix_tx).await?;

        let snapshot = {
            let mut guard = self.active.lock().await;
            let run = guard.as_mut().ok_or(TrackingError::NoActiveSession)?;
            let now = self.clock.now_ms();
            if let Some(index) = run.session.resume(now) {
                log_info!("Resumed run {} in segment {}", run.session.id(), index);
            }
            capture_snapshot(&run.session, now)
        };

        self.write_transition_snapshot(snapshot).await;
        Ok(self.emit_state_changed().await)
    }

    /// Ends the run and hands back the finished result for review. The
    /// snapshot is discarded; persist the run with [`Self::save_run`].
    pub async fn stop(&self) -> TrackingResult<Run> {
        let _op = self.op_lock.lock().await;
        if self.active.lock().await.is_none() {
            return Err(TrackingError::NoActiveSession);
        }

        self.teardown().await;

        let active = self
            .active
            .lock()
            .await
            .take()
            .ok_or(TrackingError::NoActiveSession)?;
        let run = active.session.finish(self.clock.now_ms());

        if let Err(err) = self.writer.delete_and_wait().await {
            warn!("Failed to discard snapshot of finished run {}: {err}", run.id);
        }
        self.signal_lost.store(false, Ordering::SeqCst);

        info!(
            "Stopped run {} after {}s over {:.0}m",
            run.id,
            run.elapsed_secs(),
            run.distance_m()
        );
        let _ = self
            .events
            .send(TrackingEvent::StateChanged(TrackingStatus::of_finished(&run)));
        let _ = self.events.send(TrackingEvent::RunCompleted {
            run_id: run.id.clone(),
        });
        Ok(run)
    }

    /// Discards the live run and its snapshot without producing a result.
    pub async fn quit(&self) -> TrackingResult<()> {
        let _op = self.op_lock.lock().await;
        if self.active.lock().await.is_none() {
            return Ok(());
        }

        self.teardown().await;
        let discarded = self.active.lock().await.take();
        if let Err(err) = self.writer.delete_and_wait().await {
            warn!("Failed to discard snapshot on quit: {err}");
        }
        self.signal_lost.store(false, Ordering::SeqCst);

        if let Some(run) = discarded {
            info!("Discarded run {}", run.session.id());
        }
        self.emit_state_changed().await;
        Ok(())
    }

    pub async fn save_run(&self, run: &Run) -> TrackingResult<()> {
        self.archive.append(run).await?;
        info!("Saved run {} ({} samples)", run.id, run.sample_count());
        let _ = self.events.send(TrackingEvent::RunSaved {
            run_id: run.id.clone(),
        });
        Ok(())
    }

    pub async fn list_runs(&self, limit: usize, offset: usize) -> TrackingResult<Vec<RunSummary>> {
        Ok(self.archive.list_runs(limit, offset).await?)
    }

    pub async fn get_run(&self, run_id: &str) -> TrackingResult<Option<Run>> {
        Ok(self.archive.get_run(run_id).await?)
    }

    pub async fn delete_run(&self, run_id: &str) -> TrackingResult<bool> {
        Ok(self.archive.delete_run(run_id).await?)
    }

    /// Reinstates an interrupted run as paused. Returns `None` when there is
    /// nothing usable to recover.
    pub async fn recover(&self) -> TrackingResult<Option<TrackingStatus>> {
        let _op = self.op_lock.lock().await;
        if self.active.lock().await.is_some() {
            return Err(TrackingError::AlreadyActive);
        }

        let snapshot = match self.snapshots.read(CURRENT_TRACKING_KEY).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(None),
            Err(StoreError::Corrupt(reason)) => {
                warn!("Discarding corrupt tracking snapshot: {reason}");
                self.discard_snapshot().await;
                return Ok(None);
            }
            Err(StoreError::Backend(err)) => return Err(TrackingError::SnapshotStore(err)),
        };

        if !snapshot.is_in_progress() {
            info!("Discarding snapshot of finished run {}", snapshot.run_id);
            self.discard_snapshot().await;
            return Ok(None);
        }

        let session = match restore_session(snapshot) {
            Ok(session) => session,
            Err(err) => {
                warn!("Discarding unrecoverable tracking snapshot: {err}");
                self.discard_snapshot().await;
                return Ok(None);
            }
        };

        let snapshot = capture_snapshot(&session, self.clock.now_ms());
        info!(
            "Recovered run {} with {} samples in {} segments",
            session.id(),
            session.sample_count(),
            session.segments().len()
        );
        {
            let filter = SampleFilter::rebuild(self.settings.filter.clone(), session.samples());
            *self.active.lock().await = Some(ActiveRun { session, filter });
        }

        self.write_transition_snapshot(snapshot).await;
        let (fix_tx, fix_rx) = mpsc::unbounded_channel();
        self.spawn_tasks(fix_tx, fix_rx).await;
        self.signal_lost.store(false, Ordering::SeqCst);

        Ok(Some(self.emit_state_changed().await))
    }

    /// Filters a raw fix and appends it to the open segment when accepted.
    pub async fn ingest_fix(&self, source: SampleSource, fix: Fix) -> Option<Sample> {
        let now = self.clock.now_ms();
        let mut guard = self.active.lock().await;
        let run = guard.as_mut()?;
        if !run.session.is_tracking() {
            log_debug!("Ignoring {} fix while {}", source.as_str(), run.session.state().as_str());
            return None;
        }

        if let Err(reason) = run.filter.check(&fix, source, now) {
            log_debug!(
                "Dropped {} fix at {}: {}",
                source.as_str(),
                fix.timestamp,
                reason.as_str()
            );
            return None;
        }

        let sample = run.session.append(&fix, source).ok()?.clone();
        run.filter.record(source, sample.timestamp);
        Some(sample)
    }

    pub(crate) fn mark_signal_lost(&self) {
        self.signal_lost.store(true, Ordering::SeqCst);
        let _ = self.events.send(TrackingEvent::SignalLost);
    }

    pub(crate) fn mark_signal_restored(&self) {
        self.signal_lost.store(false, Ordering::SeqCst);
        let _ = self.events.send(TrackingEvent::SignalRestored);
    }

    async fn ensure_location_available(&self) -> TrackingResult<()> {
        let mut permission = self.location.check_permission().await;
        if !permission.is_granted() {
            permission = self.location.request_permission().await;
        }
        if !permission.is_granted() {
            return Err(TrackingError::PermissionDenied);
        }
        if !self.location.services_enabled().await {
            return Err(TrackingError::ServicesDisabled);
        }
        Ok(())
    }

    async fn write_transition_snapshot(&self, snapshot: Snapshot) {
        if let Err(err) = self.writer.write_and_wait(snapshot).await {
            warn!("Transition snapshot not saved: {err}");
        }
    }

    async fn discard_snapshot(&self) {
        if let Err(err) = self.writer.delete_and_wait().await {
            warn!("Failed to delete tracking snapshot: {err}");
        }
    }

    async fn emit_state_changed(&self) -> TrackingStatus {
        let status = self.status().await;
        let _ = self.events.send(TrackingEvent::StateChanged(status.clone()));
        status
    }

    async fn spawn_tasks(
        &self,
        fix_tx: mpsc::UnboundedSender<WatchEvent>,
        fix_rx: mpsc::UnboundedReceiver<WatchEvent>,
    ) {
        let mut tasks_guard = self.tasks.lock().await;
        if let Some(previous) = tasks_guard.take() {
            previous.cancel_token.cancel();
            for handle in previous.handles {
                handle.abort();
            }
        }

        let cancel_token = CancellationToken::new();
        let handles = vec![
            tokio::spawn(ticker_loop(self.clone(), cancel_token.clone())),
            tokio::spawn(health_loop(
                self.clone(),
                self.settings.health_poll_interval(),
                cancel_token.clone(),
            )),
            tokio::spawn(ingest_loop(self.clone(), fix_rx, cancel_token.clone())),
        ];

        *tasks_guard = Some(RunTasks {
            cancel_token,
            fix_tx,
            handles,
        });
    }

    /// Stops the watchers, then cancels and joins the session's tasks.
    async fn teardown(&self) {
        self.watchers.stop().await;

        let tasks = self.tasks.lock().await.take();
        if let Some(tasks) = tasks {
            tasks.cancel_token.cancel();
            for handle in tasks.handles {
                if let Err(err) = handle.await {
                    error!("Tracking task failed to join: {err}");
                }
            }
        }
    }
}

async fn ticker_loop(controller: TrackingController, cancel_token: CancellationToken) {
    let mut interval = time::interval(controller.settings.tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let snapshot_every = controller.settings.snapshot_every_ticks.max(1);
    let mut ticks: u32 = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = controller.clock.now_ms();
                let (status, snapshot) = {
                    let mut guard = controller.active.lock().await;
                    let Some(run) = guard.as_mut() else { break };
                    if !run.session.is_tracking() {
                        continue;
                    }
                    run.session.tick(now);
                    ticks = ticks.wrapping_add(1);
                    let snapshot = (ticks % snapshot_every == 0)
                        .then(|| capture_snapshot(&run.session, now));
                    (
                        TrackingStatus::of_session(&run.session, controller.is_signal_lost()),
                        snapshot,
                    )
                };

                if let Some(snapshot) = snapshot {
                    controller.writer.queue_write(snapshot);
                }
                let _ = controller.events.send(TrackingEvent::Heartbeat(status));
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}

async fn ingest_loop(
    controller: TrackingController,
    mut fix_rx: mpsc::UnboundedReceiver<WatchEvent>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            event = fix_rx.recv() => match event {
                Some(WatchEvent::Fix(source, fix)) => {
                    controller.ingest_fix(source, fix).await;
                }
                Some(WatchEvent::Error(source, message)) => {
                    warn!("{} watcher error: {message}", source.as_str());
                }
                None => break,
            },
            _ = cancel_token.cancelled() => break,
        }
    }
}
