//! Simulated sensor for tests and hardware-free runs.

use super::{Frame, SensorDriver, SensorError};
use crate::settings::{ExposureMode, Framerate, Resolution, WhiteBalanceGains};
use std::collections::HashMap;

/// Operation recorded by [`SimulatedSensor`].
#[derive(Debug, Clone, PartialEq)]
pub enum SensorOp {
    /// Sensor acquired.
    Open,
    /// Output resolution set.
    Resolution(Resolution),
    /// Rotation set, in degrees.
    Rotation(u16),
    /// Framerate set.
    Framerate(Framerate),
    /// Shutter speed set, in microseconds.
    ShutterSpeed(u32),
    /// Manual white-balance gains applied.
    WhiteBalance(WhiteBalanceGains),
    /// Exposure mode set.
    ExposureMode(ExposureMode),
    /// Frame captured.
    Capture,
    /// Sensor released.
    Close,
}

/// Sensor whose output responds predictably to white-balance gains.
///
/// Every pixel of a captured frame has red `base.0 * red_gain`, green
/// `base.1` and blue `base.2 * blue_gain`, rounded and clamped to `u8`.
/// Analog and digital gain read-back is keyed by shutter speed so each
/// lighting channel can report its own values.
#[derive(Debug)]
pub struct SimulatedSensor {
    base: (f64, f64, f64),
    default_gain: (f64, f64),
    gains_by_shutter: HashMap<u32, (f64, f64)>,
    open: bool,
    resolution: Resolution,
    shutter_speed_us: u32,
    white_balance: WhiteBalanceGains,
    log: Vec<SensorOp>,
    opens: usize,
    closes: usize,
    captures: usize,
    fail_open_at: Option<usize>,
    fail_capture: bool,
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self {
            base: (120.0, 110.0, 95.0),
            default_gain: (1.0, 1.0),
            gains_by_shutter: HashMap::new(),
            open: false,
            resolution: Resolution::new(128, 80),
            shutter_speed_us: 0,
            white_balance: WhiteBalanceGains::new(1.0, 1.0),
            log: Vec::new(),
            opens: 0,
            closes: 0,
            captures: 0,
            fail_open_at: None,
            fail_capture: false,
        }
    }
}

impl SimulatedSensor {
    /// Creates a sensor with a warm default scene and unity gains.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the unbalanced scene intensity of red, green and blue.
    pub fn with_scene(mut self, red: f64, green: f64, blue: f64) -> Self {
        self.base = (red, green, blue);
        self
    }

    /// Sets the gains reported for any shutter speed without its own entry.
    pub fn with_default_gain(mut self, analog: f64, digital: f64) -> Self {
        self.default_gain = (analog, digital);
        self
    }

    /// Sets the gains reported while configured with `shutter_speed_us`.
    pub fn with_gain_for_shutter(mut self, shutter_speed_us: u32, analog: f64, digital: f64) -> Self {
        self.gains_by_shutter
            .insert(shutter_speed_us, (analog, digital));
        self
    }

    /// Makes the `n`-th call to `open` (1-based) fail.
    pub fn fail_open_at(&mut self, n: usize) {
        self.fail_open_at = Some(n);
    }

    /// Makes every capture fail while set.
    pub fn fail_capture(&mut self, fail: bool) {
        self.fail_capture = fail;
    }

    /// Operations performed so far.
    pub fn log(&self) -> &[SensorOp] {
        &self.log
    }

    /// Returns true while the sensor is acquired.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Number of successful and failed open attempts.
    pub fn open_count(&self) -> usize {
        self.opens
    }

    /// Number of close calls.
    pub fn close_count(&self) -> usize {
        self.closes
    }

    /// Number of frames captured.
    pub fn capture_count(&self) -> usize {
        self.captures
    }

    /// Last white-balance gains applied.
    pub fn white_balance(&self) -> WhiteBalanceGains {
        self.white_balance
    }

    fn ensure_open(&self) -> Result<(), SensorError> {
        if self.open {
            Ok(())
        } else {
            Err(SensorError::NotOpen)
        }
    }
}

fn to_intensity(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

impl SensorDriver for SimulatedSensor {
    fn open(&mut self) -> Result<(), SensorError> {
        self.opens += 1;
        self.log.push(SensorOp::Open);
        if self.fail_open_at == Some(self.opens) {
            return Err(SensorError::OpenFailed(format!(
                "simulated failure on open #{}",
                self.opens
            )));
        }
        self.open = true;
        Ok(())
    }

    fn set_resolution(&mut self, resolution: Resolution) -> Result<(), SensorError> {
        self.ensure_open()?;
        if resolution.width == 0 || resolution.height == 0 {
            return Err(SensorError::ConfigFailed("zero resolution".into()));
        }
        self.resolution = resolution;
        self.log.push(SensorOp::Resolution(resolution));
        Ok(())
    }

    fn set_rotation(&mut self, degrees: u16) -> Result<(), SensorError> {
        self.ensure_open()?;
        self.log.push(SensorOp::Rotation(degrees));
        Ok(())
    }

    fn set_framerate(&mut self, framerate: Framerate) -> Result<(), SensorError> {
        self.ensure_open()?;
        self.log.push(SensorOp::Framerate(framerate));
        Ok(())
    }

    fn set_shutter_speed(&mut self, shutter_speed_us: u32) -> Result<(), SensorError> {
        self.ensure_open()?;
        self.shutter_speed_us = shutter_speed_us;
        self.log.push(SensorOp::ShutterSpeed(shutter_speed_us));
        Ok(())
    }

    fn set_white_balance(&mut self, gains: WhiteBalanceGains) -> Result<(), SensorError> {
        self.ensure_open()?;
        self.white_balance = gains;
        self.log.push(SensorOp::WhiteBalance(gains));
        Ok(())
    }

    fn set_exposure_mode(&mut self, mode: ExposureMode) -> Result<(), SensorError> {
        self.ensure_open()?;
        self.log.push(SensorOp::ExposureMode(mode));
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame, SensorError> {
        self.ensure_open()?;
        if self.fail_capture {
            return Err(SensorError::CaptureFailed("simulated capture failure".into()));
        }
        self.captures += 1;
        self.log.push(SensorOp::Capture);

        let rgb = [
            to_intensity(self.base.0 * self.white_balance.red),
            to_intensity(self.base.1),
            to_intensity(self.base.2 * self.white_balance.blue),
        ];
        Ok(Frame::filled(self.resolution.width, self.resolution.height, rgb))
    }

    fn analog_gain(&self) -> Result<f64, SensorError> {
        self.ensure_open()?;
        Ok(self
            .gains_by_shutter
            .get(&self.shutter_speed_us)
            .unwrap_or(&self.default_gain)
            .0)
    }

    fn digital_gain(&self) -> Result<f64, SensorError> {
        self.ensure_open()?;
        Ok(self
            .gains_by_shutter
            .get(&self.shutter_speed_us)
            .unwrap_or(&self.default_gain)
            .1)
    }

    fn close(&mut self) {
        self.open = false;
        self.closes += 1;
        self.log.push(SensorOp::Close);
    }
}
