use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

/// Thresholds for the sample filter chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterSettings {
    pub max_accuracy_m: f64,
    pub foreground_min_interval_ms: i64,
    pub background_max_age_ms: i64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            max_accuracy_m: 25.0,
            foreground_min_interval_ms: 800,
            background_max_age_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackingSettings {
    pub tick_interval_ms: u64,
    /// Snapshot cadence while tracking, counted in ticks.
    pub snapshot_every_ticks: u32,
    pub health_poll_interval_ms: u64,
    pub seed_with_current_fix: bool,
    pub filter: FilterSettings,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            snapshot_every_ticks: 10,
            health_poll_interval_ms: 1_000,
            seed_with_current_fix: true,
            filter: FilterSettings::default(),
        }
    }
}

impl TrackingSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms.max(1))
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<TrackingSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring unparsable settings at {}: {err}",
                    path.display()
                );
                TrackingSettings::default()
            })
        } else {
            TrackingSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn tracking(&self) -> TrackingSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update_tracking(&self, settings: TrackingSettings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &TrackingSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        assert_eq!(store.tracking(), TrackingSettings::default());
    }

    #[test]
    fn test_update_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut settings = store.tracking();
        settings.tick_interval_ms = 250;
        settings.filter.max_accuracy_m = 30.0;
        store.update_tracking(settings.clone()).unwrap();

        let reloaded = SettingsStore::new(path).unwrap();
        assert_eq!(reloaded.tracking(), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"tick_interval_ms": 200, "filter": {"max_accuracy_m": 10.0}}"#)
            .unwrap();

        let settings = SettingsStore::new(path).unwrap().tracking();
        assert_eq!(settings.tick_interval_ms, 200);
        assert_eq!(settings.filter.max_accuracy_m, 10.0);
        assert_eq!(settings.filter.foreground_min_interval_ms, 800);
        assert_eq!(settings.snapshot_every_ticks, 10);
    }

    #[test]
    fn test_garbage_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let settings = SettingsStore::new(path).unwrap().tracking();
        assert_eq!(settings, TrackingSettings::default());
    }
}
