//! Camera model settings and rig configuration.
//!
//! Model settings are static per camera type. Rig configuration is read from
//! a TOML file and carries paths, wired light channels, and timing.

mod channel;
mod config;
mod model;

pub use channel::{CameraIdentity, LightChannel, UnknownChannel};
pub use config::{RigConfig, RigConfigError, TimingConfig};
pub use model::{
    CameraSettings, ChannelSettings, ExposureMode, Framerate, Rect, Resolution,
    WhiteBalanceGains,
};
