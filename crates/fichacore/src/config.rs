//! # Configuration
//!
//! Governance limits and intervals are managed by [`confique`], which layers
//! environment variables over a TOML file over compiled defaults.
//!
//! ## Resolution Order
//!
//! 1. **Environment variables**: `FICHA_MAX_PHOTOS_PER_POZO`, `FICHA_DATA_DIR`, etc.
//! 2. **Config file**: the path given to [`GovernanceConfig::load`] (usually `fichas.toml`).
//! 3. **Compiled defaults**: `#[config(default = ...)]`.
//!
//! ## Available Settings
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | `max_photos_per_pozo` | `100` | Photos a single ficha may hold |
//! | `max_photo_size_bytes` | `10485760` | Largest accepted photo (10 MiB) |
//! | `degraded_photo_threshold` | `2000` | Photos held across all fichas before degraded mode |
//! | `max_concurrent_imports` | `20` | Spreadsheet imports in flight |
//! | `max_open_fichas` | `25` | Fichas open at once |
//! | `max_history_entries` | `50` | Snapshots kept per ficha |
//! | `max_audit_entries` | `200` | Audit events retained |
//! | `monitor_interval_ms` | `5000` | Resource monitor period |
//! | `data_dir` | OS data dir | Where [`crate::store::fs_backend::FsBackend`] writes |

use crate::error::{FichaError, Result};
use crate::limits::ResourceLimits;
use confique::Config;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GovernanceConfig {
    #[config(default = 100, env = "FICHA_MAX_PHOTOS_PER_POZO")]
    pub max_photos_per_pozo: usize,

    #[config(default = 10485760, env = "FICHA_MAX_PHOTO_SIZE_BYTES")]
    pub max_photo_size_bytes: u64,

    #[config(default = 2000, env = "FICHA_DEGRADED_PHOTO_THRESHOLD")]
    pub degraded_photo_threshold: usize,

    #[config(default = 20, env = "FICHA_MAX_CONCURRENT_IMPORTS")]
    pub max_concurrent_imports: usize,

    #[config(default = 25, env = "FICHA_MAX_OPEN_FICHAS")]
    pub max_open_fichas: usize,

    #[config(default = 50, env = "FICHA_MAX_HISTORY_ENTRIES")]
    pub max_history_entries: usize,

    #[config(default = 200, env = "FICHA_MAX_AUDIT_ENTRIES")]
    pub max_audit_entries: usize,

    #[config(default = 5000, env = "FICHA_MONITOR_INTERVAL_MS")]
    pub monitor_interval_ms: u64,

    /// Storage directory. When absent, the OS data directory is used.
    #[config(env = "FICHA_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        let limits = ResourceLimits::default();
        Self {
            max_photos_per_pozo: limits.max_photos_per_pozo,
            max_photo_size_bytes: limits.max_photo_size_bytes,
            degraded_photo_threshold: limits.degraded_photo_threshold,
            max_concurrent_imports: limits.max_concurrent_imports,
            max_open_fichas: limits.max_open_fichas,
            max_history_entries: crate::history::MAX_HISTORY_ENTRIES,
            max_audit_entries: crate::audit::MAX_AUDIT_ENTRIES,
            monitor_interval_ms: crate::monitor::DEFAULT_CHECK_INTERVAL.as_millis() as u64,
            data_dir: None,
        }
    }
}

impl GovernanceConfig {
    /// Load with env over `path` (if given and present) over defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Self::builder().env();
        if let Some(path) = path {
            builder = builder.file(path);
        }
        builder.load().map_err(|e| FichaError::Config(e.to_string()))
    }

    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            max_photos_per_pozo: self.max_photos_per_pozo,
            max_photo_size_bytes: self.max_photo_size_bytes,
            degraded_photo_threshold: self.degraded_photo_threshold,
            max_concurrent_imports: self.max_concurrent_imports,
            max_open_fichas: self.max_open_fichas,
        }
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    /// Configured data directory, falling back to the OS data directory.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        ProjectDirs::from("", "", "fichas")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| FichaError::Config("no home directory to derive data_dir".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_match_built_in_limits() {
        let config = GovernanceConfig::default();
        assert_eq!(config.limits(), ResourceLimits::default());
        assert_eq!(config.max_history_entries, 50);
        assert_eq!(config.max_audit_entries, 200);
        assert_eq!(config.monitor_interval(), Duration::from_secs(5));
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fichas.toml");
        fs::write(
            &path,
            "max_photos_per_pozo = 12\nmonitor_interval_ms = 250\ndata_dir = \"/tmp/fichas\"\n",
        )
        .unwrap();

        let config = GovernanceConfig::load(Some(&path)).unwrap();
        assert_eq!(config.max_photos_per_pozo, 12);
        assert_eq!(config.limits().max_photos_per_pozo, 12);
        assert_eq!(config.monitor_interval(), Duration::from_millis(250));
        assert_eq!(config.max_open_fichas, 25);
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/fichas"));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GovernanceConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.max_photo_size_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fichas.toml");
        fs::write(&path, "max_photos_per_pozo = \"many\"").unwrap();
        let err = GovernanceConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, FichaError::Config(_)));
    }
}
