pub mod clock;
pub mod db;
pub mod location;
pub mod models;
pub mod persistence;
pub mod settings;
pub mod tracking;
mod utils;

use std::{env, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use clock::SystemClock;
use db::Database;
use location::SimulatedLocation;
use models::Run;
use settings::SettingsStore;
use tracking::{TrackingController, TrackingEvent};

const DEFAULT_DEMO_SECS: u64 = 30;
// Seattle waterfront.
const DEMO_START: (f64, f64) = (47.6062, -122.3421);

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("runtrack starting up...");

    if let Err(err) = run_session() {
        error!("runtrack failed: {err:#}");
        std::process::exit(1);
    }
}

fn data_dir() -> PathBuf {
    env::var_os("RUNTRACK_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("runtrack-data"))
}

fn demo_duration() -> Duration {
    let secs = env::var("RUNTRACK_DEMO_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_DEMO_SECS);
    Duration::from_secs(secs.max(1))
}

fn run_session() -> Result<()> {
    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings = SettingsStore::new(data_dir.join("settings.json"))?;
    let database = Database::new(data_dir.join("runtrack.sqlite3"))?;
    let demo_for = demo_duration();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(drive(settings, database, demo_for))
}

async fn drive(settings: SettingsStore, database: Database, demo_for: Duration) -> Result<()> {
    let database = Arc::new(database);
    let controller = TrackingController::new(
        Arc::new(SimulatedLocation::new(DEMO_START.0, DEMO_START.1)),
        database.clone(),
        database.clone(),
        Arc::new(SystemClock),
        settings.tracking(),
    );
    tokio::spawn(log_events(controller.subscribe()));

    match controller.recover().await? {
        Some(status) => {
            info!(
                "Resuming interrupted run {} ({} samples so far)",
                status.run_id.unwrap_or_default(),
                status.sample_count
            );
            controller.resume().await?;
        }
        None => {
            controller.start().await?;
        }
    }

    tokio::select! {
        _ = tokio::time::sleep(demo_for) => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; the run stays on disk and resumes on next launch");
            return Ok(());
        }
    }

    let run = controller.stop().await?;
    controller.save_run(&run).await?;
    log_run_summary(&run);

    let history = controller.list_runs(5, 0).await?;
    info!(
        "{} recent run(s) in history at {}",
        history.len(),
        database.path().display()
    );
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<TrackingEvent>) {
    loop {
        match events.recv().await {
            Ok(TrackingEvent::Heartbeat(status)) => debug!(
                "heartbeat: {}s, {} samples, {:.0}m",
                status.elapsed_ms / 1000,
                status.sample_count,
                status.distance_m
            ),
            Ok(TrackingEvent::StateChanged(status)) => {
                info!("state -> {}", status.state.as_str())
            }
            Ok(TrackingEvent::SignalLost) => warn!("GPS signal lost; run paused"),
            Ok(TrackingEvent::SignalRestored) => info!("GPS signal restored; resume manually"),
            Ok(TrackingEvent::RunCompleted { run_id }) => info!("run {run_id} completed"),
            Ok(TrackingEvent::RunSaved { run_id }) => info!("run {run_id} saved"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("event log skipped {skipped} events")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn log_run_summary(run: &Run) {
    let pace = run
        .average_pace_secs_per_km()
        .map(|secs| format!("{}:{:02}/km", secs as u64 / 60, secs as u64 % 60))
        .unwrap_or_else(|| "n/a".to_string());
    let started = run
        .started_at()
        .map(|at| at.to_rfc3339())
        .unwrap_or_default();

    info!(
        "Run {} started {}: {:.2} km in {}s over {} segment(s), {} samples, pace {}",
        run.id,
        started,
        run.distance_m() / 1000.0,
        run.elapsed_secs(),
        run.segments.len(),
        run.sample_count(),
        pace
    );
}
