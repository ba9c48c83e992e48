//! Application settings.
//!
//! [`AppSettings`] is persisted as JSON. Missing keys fall back to defaults so
//! older files keep loading.
//!
//! The pipeline never owns the values a user toggles at runtime (caching
//! delay, loop, audio scrubbing). It reads them through [`ConfigStore`], so
//! the application can change them while a viewer is running.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::core::playback::MAX_PREQUEUE;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    // Pipeline
    pub workers: usize, // 0 = auto (num_cpus)
    pub max_prequeue: usize,
    pub cache_dir: Option<PathBuf>, // overrides the platform cache directory
    pub cache_name: String,
    pub invalidation_history: usize, // remembered invalidations for stale-write checks
    pub frames_per_cache_job: usize,

    // Viewer
    pub caching_delay_ms: u64, // idle time before background caching starts
    pub loop_enabled: bool,
    pub audio_scrubbing: bool,
    pub autocache: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            workers: 0,
            max_prequeue: MAX_PREQUEUE,
            cache_dir: None,
            cache_name: "default".to_string(),
            invalidation_history: 256,
            frames_per_cache_job: 24,
            caching_delay_ms: 1000,
            loop_enabled: false,
            audio_scrubbing: true,
            autocache: true,
        }
    }
}

impl AppSettings {
    /// Worker count with `0` resolved to the number of CPUs.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 { num_cpus::get().max(1) } else { self.workers }
    }

    pub fn caching_delay(&self) -> Duration {
        Duration::from_millis(self.caching_delay_ms)
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        info!("Settings loaded from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write settings: {}", path.display()))?;
        debug!("Settings saved to {}", path.display());
        Ok(())
    }
}

/// Read-only view of the externally owned settings.
pub trait ConfigStore: Send + Sync {
    fn caching_delay(&self) -> Duration;
    fn loop_enabled(&self) -> bool;
    fn audio_scrubbing(&self) -> bool;
}

impl<T: ConfigStore + ?Sized> ConfigStore for Arc<T> {
    fn caching_delay(&self) -> Duration {
        (**self).caching_delay()
    }

    fn loop_enabled(&self) -> bool {
        (**self).loop_enabled()
    }

    fn audio_scrubbing(&self) -> bool {
        (**self).audio_scrubbing()
    }
}

impl ConfigStore for AppSettings {
    fn caching_delay(&self) -> Duration {
        AppSettings::caching_delay(self)
    }

    fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    fn audio_scrubbing(&self) -> bool {
        self.audio_scrubbing
    }
}

/// Settings shared between the application (writer) and viewers (readers).
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<AppSettings>>,
}

impl SharedSettings {
    pub fn new(settings: AppSettings) -> Self {
        Self { inner: Arc::new(RwLock::new(settings)) }
    }

    pub fn get(&self) -> AppSettings {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut AppSettings)) {
        let mut settings = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut settings);
    }
}

impl ConfigStore for SharedSettings {
    fn caching_delay(&self) -> Duration {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).caching_delay()
    }

    fn loop_enabled(&self) -> bool {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).loop_enabled
    }

    fn audio_scrubbing(&self) -> bool {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).audio_scrubbing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: AppSettings = serde_json::from_str(r#"{"workers": 3, "loop_enabled": true}"#).unwrap();
        assert_eq!(settings.workers, 3);
        assert!(settings.loop_enabled);
        assert_eq!(settings.max_prequeue, 16);
        assert_eq!(settings.cache_name, "default");
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = AppSettings { caching_delay_ms: 250, cache_name: "proj".into(), ..Default::default() };
        settings.save(&path).unwrap();
        assert_eq!(AppSettings::load(&path).unwrap(), settings);
        assert_eq!(AppSettings::load(&dir.path().join("missing.json")).unwrap(), AppSettings::default());
    }

    #[test]
    fn test_bad_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(AppSettings::load(&path).is_err());
    }

    #[test]
    fn test_worker_count_auto() {
        assert!(AppSettings::default().worker_count() >= 1);
        assert_eq!(AppSettings { workers: 2, ..Default::default() }.worker_count(), 2);
    }

    #[test]
    fn test_shared_settings_visible_to_readers() {
        let shared = SharedSettings::default();
        let reader: Arc<dyn ConfigStore> = Arc::new(shared.clone());
        assert!(!reader.loop_enabled());
        shared.update(|s| {
            s.loop_enabled = true;
            s.caching_delay_ms = 10;
        });
        assert!(reader.loop_enabled());
        assert_eq!(reader.caching_delay(), Duration::from_millis(10));
    }
}
