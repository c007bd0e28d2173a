//! Dark-frame subtraction.
//!
//! A dark frame taken with the channel light off records the sensor's fixed
//! noise floor. Subtracting it from the lit frame saturates at zero.

use crate::error::{CameraError, Result};
use crate::sensor::Frame;
use crate::settings::LightChannel;

/// Returns true if captures under `channel` are dark-frame corrected.
///
/// Growth lighting runs with a short shutter where dark current is
/// negligible, so its frames are used as captured.
pub fn uses_dark_frame(channel: LightChannel) -> bool {
    channel != LightChannel::Growth
}

/// Pixel-wise `bright - dark`, clamped at zero.
pub fn subtract_saturating(bright: &[u8], dark: &[u8]) -> Vec<u8> {
    bright
        .iter()
        .zip(dark)
        .map(|(b, d)| b.saturating_sub(*d))
        .collect()
}

/// Subtracts `dark` from `bright`; both must have the same dimensions.
pub fn subtract_dark_frame(bright: &Frame, dark: &Frame) -> Result<Frame> {
    if bright.width() != dark.width()
        || bright.height() != dark.height()
        || bright.pixels().len() != dark.pixels().len()
    {
        return Err(CameraError::FrameMismatch {
            bright: (bright.width(), bright.height()),
            dark: (dark.width(), dark.height()),
        });
    }

    Ok(Frame::new(
        subtract_saturating(bright.pixels(), dark.pixels()),
        bright.width(),
        bright.height(),
    ))
}
