//! Calibration file persistence.
//!
//! Records are written to a temporary file in the target directory and
//! renamed over the old file, so a reader only ever sees a complete record.

use super::{CalibrationRecord, GainState};
use crate::settings::{CameraIdentity, LightChannel};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or saving the calibration file.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No calibration file exists yet.
    #[error("calibration file not found: {0}")]
    NotFound(PathBuf),
    /// The file exists but cannot be trusted for this camera.
    #[error("calibration file {path} is not usable: {reason}")]
    Invalid {
        /// Rejected file.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },
    /// Reading or writing the file failed.
    #[error("calibration file I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The record could not be encoded as TOML.
    #[error("failed to encode calibration record: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Reads and atomically replaces the calibration file of one camera.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    path: PathBuf,
    identity: CameraIdentity,
    required_channels: Vec<LightChannel>,
}

impl CalibrationStore {
    /// Creates a store for the camera `identity`.
    ///
    /// A loaded gain table must cover every channel in `required_channels`.
    pub fn new(
        path: impl Into<PathBuf>,
        identity: CameraIdentity,
        required_channels: Vec<LightChannel>,
    ) -> Self {
        Self {
            path: path.into(),
            identity,
            required_channels,
        }
    }

    /// Location of the calibration file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and validates the record.
    pub fn load(&self) -> Result<CalibrationRecord, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.clone()))
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        let record: CalibrationRecord =
            toml::from_str(&content).map_err(|e| self.invalid(e.to_string()))?;

        if record.camera_identity != self.identity {
            return Err(self.invalid(format!(
                "written for {}, running camera is {}",
                record.camera_identity, self.identity
            )));
        }

        if let GainState::Calibrated(table) = &record.gain {
            if let Some(missing) = self
                .required_channels
                .iter()
                .find(|c| !table.channels.contains_key(*c))
            {
                return Err(self.invalid(format!("no gain for channel {}", missing)));
            }
        }

        tracing::debug!(path = %self.path.display(), "Loaded calibration record");
        Ok(record)
    }

    /// Replaces the stored record with `record`.
    pub fn save(&self, record: &CalibrationRecord) -> Result<(), StoreError> {
        let content = toml::to_string_pretty(record)?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        tracing::debug!(path = %self.path.display(), "Saved calibration record");
        Ok(())
    }

    fn invalid(&self, reason: String) -> StoreError {
        StoreError::Invalid {
            path: self.path.clone(),
            reason,
        }
    }
}
