//! Runtime configuration of a camera rig.
//!
//! Timing constants are load-bearing: the settle and warm-up delays give
//! automatic gain control time to converge before gains are frozen.

use super::{CameraSettings, LightChannel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest accepted delay or timeout, one year in seconds.
pub const MAX_TIMING_SECS: f64 = 365.0 * 24.0 * 3600.0;

/// Timing used by calibration and capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Wait before freezing gains during gain calibration, in seconds.
    pub gain_settle_secs: f64,
    /// Wait before freezing gains during white-balance calibration, in seconds.
    pub white_balance_warmup_secs: f64,
    /// Hard limit for one capture worker, in seconds.
    pub worker_timeout_secs: f64,
    /// Maximum age of gain data before a capture triggers recalibration, in hours.
    pub staleness_hours: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            gain_settle_secs: 30.0,
            white_balance_warmup_secs: 20.0,
            worker_timeout_secs: 20.0,
            staleness_hours: 24.0,
        }
    }
}

impl TimingConfig {
    /// Timing with every delay removed, for simulated hardware.
    pub fn immediate() -> Self {
        Self {
            gain_settle_secs: 0.0,
            white_balance_warmup_secs: 0.0,
            ..Self::default()
        }
    }

    /// Gain settle delay.
    pub fn gain_settle(&self) -> Duration {
        Duration::from_secs_f64(self.gain_settle_secs)
    }

    /// White-balance warm-up delay.
    pub fn white_balance_warmup(&self) -> Duration {
        Duration::from_secs_f64(self.white_balance_warmup_secs)
    }

    /// Worker timeout.
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.worker_timeout_secs)
    }

    /// Staleness threshold.
    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.staleness_hours * 3_600_000.0) as i64)
    }

    /// Validates the timing parameters.
    ///
    /// Every value must be finite, non-negative and at most one year; the
    /// worker timeout must also be positive. A validated config converts to
    /// durations without overflow.
    pub fn validate(&self) -> Result<(), RigConfigError> {
        let delays = [
            self.gain_settle_secs,
            self.white_balance_warmup_secs,
            self.worker_timeout_secs,
            self.staleness_hours * 3600.0,
        ];
        if delays
            .iter()
            .any(|d| !d.is_finite() || *d < 0.0 || *d > MAX_TIMING_SECS)
        {
            return Err(RigConfigError::InvalidTiming);
        }
        if self.worker_timeout_secs <= 0.0 {
            return Err(RigConfigError::InvalidTiming);
        }
        Ok(())
    }
}

/// Configuration of one camera rig.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Persisted calibration record.
    pub calibration_file: PathBuf,
    /// Directory receiving the bright and dark worker images.
    pub scratch_dir: PathBuf,
    /// External still-capture program.
    pub capture_program: PathBuf,
    /// Light channels wired to this rig.
    pub light_channels: Vec<LightChannel>,
    /// Timing parameters.
    pub timing: TimingConfig,
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            calibration_file: PathBuf::from("cam/config.toml"),
            scratch_dir: PathBuf::from("cam/tmp"),
            capture_program: PathBuf::from("raspistill"),
            light_channels: vec![LightChannel::Growth],
            timing: TimingConfig::default(),
            metrics_port: 9090,
        }
    }
}

impl RigConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RigConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| RigConfigError::FileReadError(e.to_string()))?;
        let config: RigConfig =
            toml::from_str(&content).map_err(|e| RigConfigError::ParseError(e.to_string()))?;
        config.timing.validate()?;
        Ok(config)
    }

    /// Enabled channels the camera model also allows, in configured order.
    pub fn active_channels(&self, settings: &CameraSettings) -> Vec<LightChannel> {
        let mut active = Vec::new();
        for channel in &self.light_channels {
            if settings.is_allowed(*channel) && !active.contains(channel) {
                active.push(*channel);
            } else if !settings.is_allowed(*channel) {
                tracing::warn!(channel = %channel, "Ignoring light channel not allowed for this camera");
            }
        }
        active
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RigConfigError {
    /// A timing value is out of range.
    #[error("invalid timing (delays must be between 0 and one year, timeout positive)")]
    InvalidTiming,
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    /// The file is not valid rig configuration TOML.
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}
