//! Crate-level error type.

use crate::calibration::StoreError;
use crate::capture::WorkerError;
use crate::sensor::SensorError;
use crate::settings::{LightChannel, RigConfigError};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Errors surfaced by calibration and capture.
#[derive(Debug, Error)]
pub enum CameraError {
    /// The channel is outside the camera's allowed set; nothing was touched.
    #[error("light channel {0} is not allowed for this camera")]
    ChannelNotAllowed(LightChannel),

    /// The rig configuration is unusable.
    #[error("invalid rig configuration: {0}")]
    Config(#[from] RigConfigError),

    /// The gain table has no entry for the channel.
    #[error("no gain measured for light channel {0}")]
    MissingGain(LightChannel),

    /// Sensor open, configure, or capture failed.
    #[error("sensor session failed: {0}")]
    Sensor(#[from] SensorError),

    /// The calibration file could not be written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An isolated capture worker failed to start, failed, or timed out.
    #[error("capture worker failed: {0}")]
    Worker(#[from] WorkerError),

    /// A worker output image could not be decoded.
    #[error("failed to load captured image {path}: {source}")]
    Image {
        /// Worker output file.
        path: PathBuf,
        /// Decode error.
        #[source]
        source: image::ImageError,
    },

    /// Bright and dark frames have different dimensions.
    #[error("bright frame is {bright:?} but dark frame is {dark:?}")]
    FrameMismatch {
        /// Bright frame width and height.
        bright: (u32, u32),
        /// Dark frame width and height.
        dark: (u32, u32),
    },

    /// The white-balance reference region does not fit the captured frame.
    #[error("white-balance reference region does not fit a {width}x{height} frame")]
    RegionOutOfFrame {
        /// Frame width.
        width: u32,
        /// Frame height.
        height: u32,
    },

    /// Scratch directory handling failed.
    #[error("scratch file error: {0}")]
    Io(#[from] std::io::Error),
}

impl CameraError {
    /// Returns true if a capture worker exceeded its time limit.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CameraError::Worker(WorkerError::Timeout { .. }))
    }
}
