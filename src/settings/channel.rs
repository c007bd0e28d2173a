//! Lighting channels and camera identity tags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named light source under independent on/off and calibration control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightChannel {
    /// Visible white lighting mounted next to the camera.
    White,
    /// The growth lighting of the plant chamber.
    Growth,
}

impl LightChannel {
    /// All channels known to the rig, in calibration order.
    pub const ALL: [LightChannel; 2] = [LightChannel::White, LightChannel::Growth];

    /// Lowercase name used in files and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            LightChannel::White => "white",
            LightChannel::Growth => "growth",
        }
    }
}

impl fmt::Display for LightChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown channel name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown light channel: {0}")]
pub struct UnknownChannel(pub String);

impl FromStr for LightChannel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "white" => Ok(LightChannel::White),
            "growth" => Ok(LightChannel::Growth),
            _ => Err(UnknownChannel(s.to_string())),
        }
    }
}

/// Tag identifying a camera hardware class.
///
/// Stored in the calibration file so that a file written for one kind of
/// camera is never trusted by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraIdentity(pub u32);

impl CameraIdentity {
    /// Raspberry Pi Camera V2.1.
    pub const PI_CAM_V21: CameraIdentity = CameraIdentity(2);
}

impl fmt::Display for CameraIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cam-{}", self.0)
    }
}
