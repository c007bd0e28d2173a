//! Placeholder driver for rigs without a sensor binding.

use super::{Frame, SensorDriver, SensorError};
use crate::settings::{ExposureMode, Framerate, Resolution, WhiteBalanceGains};

/// Driver that refuses to open.
///
/// Lets an engine capture through the external still-capture program with
/// stored calibration while any attempt to measure gains or white balance
/// fails before the calibration file is written.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnattachedSensor;

impl SensorDriver for UnattachedSensor {
    fn open(&mut self) -> Result<(), SensorError> {
        Err(SensorError::OpenFailed(
            "no sensor driver is attached to this rig".to_string(),
        ))
    }

    fn set_resolution(&mut self, _resolution: Resolution) -> Result<(), SensorError> {
        Err(SensorError::NotOpen)
    }

    fn set_rotation(&mut self, _degrees: u16) -> Result<(), SensorError> {
        Err(SensorError::NotOpen)
    }

    fn set_framerate(&mut self, _framerate: Framerate) -> Result<(), SensorError> {
        Err(SensorError::NotOpen)
    }

    fn set_shutter_speed(&mut self, _shutter_speed_us: u32) -> Result<(), SensorError> {
        Err(SensorError::NotOpen)
    }

    fn set_white_balance(&mut self, _gains: WhiteBalanceGains) -> Result<(), SensorError> {
        Err(SensorError::NotOpen)
    }

    fn set_exposure_mode(&mut self, _mode: ExposureMode) -> Result<(), SensorError> {
        Err(SensorError::NotOpen)
    }

    fn capture(&mut self) -> Result<Frame, SensorError> {
        Err(SensorError::NotOpen)
    }

    fn analog_gain(&self) -> Result<f64, SensorError> {
        Err(SensorError::NotOpen)
    }

    fn digital_gain(&self) -> Result<f64, SensorError> {
        Err(SensorError::NotOpen)
    }

    fn close(&mut self) {}
}
