//! Static per-model camera settings.
//!
//! These values describe how a particular camera model must be driven for
//! each lighting channel. They are built once and handed to every component
//! at construction; nothing mutates them at runtime.

use super::{CameraIdentity, LightChannel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sensor resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Resolution {
    /// Creates a resolution.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Rational frame rate, as sensor drivers accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Framerate {
    /// Numerator in frames.
    pub num: u32,
    /// Denominator in seconds.
    pub den: u32,
}

impl Framerate {
    /// Creates a rational frame rate of `num / den` frames per second.
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Frame rate in frames per second.
    pub fn fps(&self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }
}

impl fmt::Display for Framerate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Axis-aligned pixel rectangle, half-open on the max side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    /// First column.
    pub x_min: u32,
    /// One past the last column.
    pub x_max: u32,
    /// First row.
    pub y_min: u32,
    /// One past the last row.
    pub y_max: u32,
}

impl Rect {
    /// Creates a rectangle covering columns `x_min..x_max` and rows `y_min..y_max`.
    pub const fn new(x_min: u32, x_max: u32, y_min: u32, y_max: u32) -> Self {
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }

    /// Rectangle covering a full frame.
    pub const fn full(resolution: Resolution) -> Self {
        Self::new(0, resolution.width, 0, resolution.height)
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.x_max.saturating_sub(self.x_min)
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.y_max.saturating_sub(self.y_min)
    }

    /// Returns true if the rectangle lies inside a frame of the given size.
    pub fn fits(&self, resolution: Resolution) -> bool {
        self.x_min < self.x_max
            && self.y_min < self.y_max
            && self.x_max <= resolution.width
            && self.y_max <= resolution.height
    }
}

/// Manual red/blue white-balance gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WhiteBalanceGains {
    /// Red channel gain.
    pub red: f64,
    /// Blue channel gain.
    pub blue: f64,
}

impl WhiteBalanceGains {
    /// Creates a gain pair.
    pub const fn new(red: f64, blue: f64) -> Self {
        Self { red, blue }
    }
}

/// Exposure mode applied once automatic gain control has converged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureMode {
    /// Automatic exposure keeps adjusting gains.
    Auto,
    /// Gains are frozen at their current values.
    Off,
}

/// Settings for one lighting channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Sensor frame rate under this light.
    pub framerate: Framerate,
    /// Shutter speed in microseconds.
    pub shutter_speed_us: u32,
    /// Fixed white balance; channels with a default skip the convergence loop.
    pub default_white_balance: Option<WhiteBalanceGains>,
}

/// Immutable settings for one camera model.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    /// Hardware class tag checked against the calibration file.
    pub identity: CameraIdentity,
    /// Capture resolution.
    pub resolution: Resolution,
    /// Per-channel sensor settings.
    pub channels: BTreeMap<LightChannel, ChannelSettings>,
    /// Plant area of the frame.
    pub ground_plane: Rect,
    /// Crop applied by downstream processing.
    pub crop: Rect,
    /// Exposure mode used to freeze gains.
    pub exposure_mode: ExposureMode,
    /// Exposure compensation.
    pub exposure_compensation: i32,
    /// Low resolution used while converging white balance.
    pub white_balance_resolution: Resolution,
    /// Reference area whose channel means are balanced.
    pub white_balance_reference: Rect,
    /// Channels this camera may be driven under.
    pub allowed_channels: Vec<LightChannel>,
}

impl CameraSettings {
    /// Settings for the Raspberry Pi Camera V2.1 in the plant chamber.
    pub fn pi_cam_v21() -> Self {
        let resolution = Resolution::new(1632, 1216);

        let mut channels = BTreeMap::new();
        channels.insert(
            LightChannel::White,
            ChannelSettings {
                framerate: Framerate::new(10, 4),
                shutter_speed_us: 400_000,
                default_white_balance: None,
            },
        );
        channels.insert(
            LightChannel::Growth,
            ChannelSettings {
                framerate: Framerate::new(30, 1),
                shutter_speed_us: 4_000,
                default_white_balance: Some(WhiteBalanceGains::new(0.4, 0.575)),
            },
        );

        Self {
            identity: CameraIdentity::PI_CAM_V21,
            resolution,
            channels,
            ground_plane: Rect::new(445, 1265, 40, 860),
            crop: Rect::full(resolution),
            exposure_mode: ExposureMode::Off,
            exposure_compensation: 0,
            white_balance_resolution: Resolution::new(128, 80),
            white_balance_reference: Rect::new(32, 96, 30, 50),
            allowed_channels: vec![LightChannel::White, LightChannel::Growth],
        }
    }

    /// Returns true if the camera may be driven under `channel`.
    pub fn is_allowed(&self, channel: LightChannel) -> bool {
        self.allowed_channels.contains(&channel)
    }

    /// Settings for an allowed channel.
    pub fn channel(&self, channel: LightChannel) -> Option<&ChannelSettings> {
        if self.is_allowed(channel) {
            self.channels.get(&channel)
        } else {
            None
        }
    }
}
