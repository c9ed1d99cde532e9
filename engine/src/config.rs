//! Engine configuration.
//!
//! Stored as TOML, by default at `<config dir>/ferry/config.toml`
//! (`~/.config/ferry/config.toml` on Linux, `%APPDATA%\ferry\config.toml` on Windows).
//! Every field has a default, so a partial file is valid.

use crate::checksums::ChecksumAlgorithm;
use crate::conflict::ConflictDecision;
use crate::error::EngineError;
use crate::model::{JobOptions, DEFAULT_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hash source and destination after each file
    pub verify_checksum: bool,
    pub checksum_algorithm: ChecksumAlgorithm,
    /// Write one placeholder file instead of transferring
    pub dry_run: bool,
    /// Read by front ends only; the engine always sends a terminal event
    pub close_on_finish: bool,
    pub log_history_enabled: bool,
    /// Maximum number of history entries kept
    pub history_cap: usize,
    /// Number of points kept for the speed graph
    pub graph_history_size: usize,
    /// Lowest speed-graph ceiling, MiB/s
    pub graph_max_speed: f64,
    /// Maximum throughput, bytes per second
    pub throttle_rate: Option<u64>,
    pub buffer_size: usize,
    pub preserve_modification_time: bool,
    /// Extra bytes that must stay free at the destination
    pub space_safety_margin: u64,
    pub progress_interval_ms: u64,
    /// Rewrite names that NTFS/FAT volumes reject (reserved names, `<>:"|?*`)
    pub sanitize_filenames: bool,
    /// History file; `None` keeps history in memory only
    pub history_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            verify_checksum: true,
            checksum_algorithm: ChecksumAlgorithm::default(),
            dry_run: false,
            close_on_finish: false,
            log_history_enabled: true,
            history_cap: 100,
            graph_history_size: 200,
            graph_max_speed: 10.0,
            throttle_rate: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            preserve_modification_time: true,
            space_safety_margin: 0,
            progress_interval_ms: 50,
            sanitize_filenames: true,
            history_file: None,
        }
    }
}

impl EngineConfig {
    /// `<config dir>/ferry/config.toml`, or `./ferry/config.toml` when the
    /// platform has no config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ferry")
            .join("config.toml")
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(EngineError::Config {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        };
        let config: EngineConfig = toml::from_str(&content).map_err(|e| EngineError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(config.validated())
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let to_config_error = |message: String| EngineError::Config {
            path: path.to_path_buf(),
            message,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| to_config_error(e.to_string()))?;
            }
        }
        let content = toml::to_string_pretty(self).map_err(|e| to_config_error(e.to_string()))?;
        fs::write(path, content).map_err(|e| to_config_error(e.to_string()))?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Replace out-of-range values with usable ones.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.buffer_size == 0 {
            self.buffer_size = 1;
        }
        if self.history_cap == 0 {
            self.history_cap = 1;
        }
        if self.graph_history_size == 0 {
            self.graph_history_size = 1;
        }
        if !self.graph_max_speed.is_finite() || self.graph_max_speed <= 0.0 {
            tracing::warn!(value = self.graph_max_speed, "invalid graph_max_speed, using default");
            self.graph_max_speed = defaults.graph_max_speed;
        }
        if self.throttle_rate == Some(0) {
            self.throttle_rate = None;
        }
        self
    }

    /// Speed-graph floor in bytes per second
    pub fn graph_floor(&self) -> f64 {
        self.graph_max_speed * MIB
    }

    /// Per-job options with no fixed conflict policy.
    pub fn job_options(&self) -> JobOptions {
        JobOptions::from(self)
    }

    /// Per-job options that answer every conflict with `policy`.
    pub fn job_options_with_policy(&self, policy: Option<ConflictDecision>) -> JobOptions {
        JobOptions {
            conflict_policy: policy,
            ..JobOptions::from(self)
        }
    }
}

impl From<&EngineConfig> for JobOptions {
    fn from(config: &EngineConfig) -> Self {
        JobOptions {
            verify_checksum: config.verify_checksum,
            checksum_algorithm: config.checksum_algorithm,
            dry_run: config.dry_run,
            conflict_policy: None,
            throttle_rate: config.throttle_rate.filter(|r| *r > 0),
            buffer_size: config.buffer_size.max(1),
            preserve_modification_time: config.preserve_modification_time,
            space_safety_margin: config.space_safety_margin,
            progress_interval: Duration::from_millis(config.progress_interval_ms),
            sanitize_filenames: config.sanitize_filenames,
        }
    }
}
