//! Sensor driver abstraction.
//!
//! The physical sensor library sits behind this trait so that calibration
//! can run against real hardware or a simulated sensor.

use super::Frame;
use crate::settings::{ExposureMode, Framerate, Resolution, WhiteBalanceGains};
use thiserror::Error;

/// Errors raised by the sensor hardware.
#[derive(Debug, Error)]
pub enum SensorError {
    /// The sensor could not be acquired.
    #[error("failed to open sensor: {0}")]
    OpenFailed(String),
    /// A setting was rejected.
    #[error("failed to configure sensor: {0}")]
    ConfigFailed(String),
    /// No frame could be read.
    #[error("failed to capture frame: {0}")]
    CaptureFailed(String),
    /// The sensor was used before `open` or after `close`.
    #[error("sensor not open")]
    NotOpen,
}

/// Primitive operations of a camera sensor.
///
/// Implementations are driven through [`SensorSession`](super::SensorSession),
/// which applies configuration in a fixed order and always closes the driver.
pub trait SensorDriver {
    /// Acquires the sensor hardware.
    fn open(&mut self) -> Result<(), SensorError>;

    /// Sets the output resolution.
    fn set_resolution(&mut self, resolution: Resolution) -> Result<(), SensorError>;

    /// Sets image rotation in degrees.
    fn set_rotation(&mut self, degrees: u16) -> Result<(), SensorError>;

    /// Sets the frame rate.
    fn set_framerate(&mut self, framerate: Framerate) -> Result<(), SensorError>;

    /// Sets the shutter speed in microseconds.
    fn set_shutter_speed(&mut self, shutter_speed_us: u32) -> Result<(), SensorError>;

    /// Disables automatic white balance and applies manual gains.
    fn set_white_balance(&mut self, gains: WhiteBalanceGains) -> Result<(), SensorError>;

    /// Sets the exposure mode.
    fn set_exposure_mode(&mut self, mode: ExposureMode) -> Result<(), SensorError>;

    /// Drops any frame buffered from an earlier capture.
    fn discard_buffered(&mut self) {}

    /// Captures one RGB frame.
    fn capture(&mut self) -> Result<Frame, SensorError>;

    /// Current analog gain multiplier.
    fn analog_gain(&self) -> Result<f64, SensorError>;

    /// Current digital gain multiplier.
    fn digital_gain(&self) -> Result<f64, SensorError>;

    /// Releases the sensor hardware.
    fn close(&mut self);
}

impl<D: SensorDriver + ?Sized> SensorDriver for Box<D> {
    fn open(&mut self) -> Result<(), SensorError> {
        (**self).open()
    }

    fn set_resolution(&mut self, resolution: Resolution) -> Result<(), SensorError> {
        (**self).set_resolution(resolution)
    }

    fn set_rotation(&mut self, degrees: u16) -> Result<(), SensorError> {
        (**self).set_rotation(degrees)
    }

    fn set_framerate(&mut self, framerate: Framerate) -> Result<(), SensorError> {
        (**self).set_framerate(framerate)
    }

    fn set_shutter_speed(&mut self, shutter_speed_us: u32) -> Result<(), SensorError> {
        (**self).set_shutter_speed(shutter_speed_us)
    }

    fn set_white_balance(&mut self, gains: WhiteBalanceGains) -> Result<(), SensorError> {
        (**self).set_white_balance(gains)
    }

    fn set_exposure_mode(&mut self, mode: ExposureMode) -> Result<(), SensorError> {
        (**self).set_exposure_mode(mode)
    }

    fn discard_buffered(&mut self) {
        (**self).discard_buffered()
    }

    fn capture(&mut self) -> Result<Frame, SensorError> {
        (**self).capture()
    }

    fn analog_gain(&self) -> Result<f64, SensorError> {
        (**self).analog_gain()
    }

    fn digital_gain(&self) -> Result<f64, SensorError> {
        (**self).digital_gain()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
