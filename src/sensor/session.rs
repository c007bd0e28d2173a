//! Scoped sensor sessions.
//!
//! A session owns the sensor for one calibration step. Configuration is
//! applied in a fixed order and exposure can only be frozen after the settle
//! delay. The driver is closed when the session is dropped, whatever the
//! outcome of the step.

use super::{Frame, SensorDriver, SensorError};
use crate::calibration::SensorGain;
use crate::settings::{ExposureMode, Framerate, Resolution, WhiteBalanceGains};
use std::time::Duration;

/// Parameters applied when a session opens.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Output resolution.
    pub resolution: Resolution,
    /// Image rotation in degrees.
    pub rotation: u16,
    /// Frame rate.
    pub framerate: Framerate,
    /// Shutter speed in microseconds.
    pub shutter_speed_us: u32,
    /// Manual white-balance gains.
    pub white_balance: WhiteBalanceGains,
}

/// Exclusive, scoped access to a sensor.
pub struct SensorSession<'a, D: SensorDriver + ?Sized> {
    driver: &'a mut D,
    frozen: bool,
}

impl<'a, D: SensorDriver + ?Sized> SensorSession<'a, D> {
    /// Opens the sensor and applies `config`.
    ///
    /// Order: resolution, rotation, framerate, shutter speed, white balance.
    /// Exposure mode is left alone until [`settle_and_freeze`](Self::settle_and_freeze).
    pub fn open(driver: &'a mut D, config: &SessionConfig) -> Result<Self, SensorError> {
        if let Err(e) = driver.open() {
            driver.close();
            return Err(e);
        }

        let mut session = Self {
            driver,
            frozen: false,
        };
        session.driver.set_resolution(config.resolution)?;
        session.driver.set_rotation(config.rotation)?;
        session.driver.set_framerate(config.framerate)?;
        session.driver.set_shutter_speed(config.shutter_speed_us)?;
        session.driver.set_white_balance(config.white_balance)?;

        tracing::debug!(
            width = config.resolution.width,
            height = config.resolution.height,
            framerate = %config.framerate,
            shutter_us = config.shutter_speed_us,
            "Sensor session opened"
        );
        Ok(session)
    }

    /// Waits for automatic exposure to converge, then sets `mode`.
    pub fn settle_and_freeze(
        &mut self,
        delay: Duration,
        mode: ExposureMode,
    ) -> Result<(), SensorError> {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.driver.set_exposure_mode(mode)?;
        self.frozen = true;
        Ok(())
    }

    /// Returns true once exposure has been frozen.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Applies new manual white-balance gains.
    pub fn set_white_balance(&mut self, gains: WhiteBalanceGains) -> Result<(), SensorError> {
        self.driver.set_white_balance(gains)
    }

    /// Discards any buffered frame and captures a fresh one.
    pub fn capture_fresh(&mut self) -> Result<Frame, SensorError> {
        self.driver.discard_buffered();
        self.driver.capture()
    }

    /// Reads the analog and digital gain the sensor settled on.
    pub fn read_gain(&self) -> Result<SensorGain, SensorError> {
        let analog = self.driver.analog_gain()?;
        let digital = self.driver.digital_gain()?;
        Ok(SensorGain::new(analog, digital))
    }
}

impl<D: SensorDriver + ?Sized> Drop for SensorSession<'_, D> {
    fn drop(&mut self) {
        self.driver.close();
        tracing::debug!("Sensor session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{SensorOp, SimulatedSensor};

    fn config() -> SessionConfig {
        SessionConfig {
            resolution: Resolution::new(16, 8),
            rotation: 180,
            framerate: Framerate::new(30, 1),
            shutter_speed_us: 4000,
            white_balance: WhiteBalanceGains::new(1.1, 1.1),
        }
    }

    #[test]
    fn test_configuration_order() {
        let mut sensor = SimulatedSensor::new();
        {
            let mut session = SensorSession::open(&mut sensor, &config()).unwrap();
            assert!(!session.is_frozen());
            session
                .settle_and_freeze(Duration::ZERO, ExposureMode::Off)
                .unwrap();
            assert!(session.is_frozen());
        }

        assert_eq!(
            sensor.log(),
            &[
                SensorOp::Open,
                SensorOp::Resolution(Resolution::new(16, 8)),
                SensorOp::Rotation(180),
                SensorOp::Framerate(Framerate::new(30, 1)),
                SensorOp::ShutterSpeed(4000),
                SensorOp::WhiteBalance(WhiteBalanceGains::new(1.1, 1.1)),
                SensorOp::ExposureMode(ExposureMode::Off),
                SensorOp::Close,
            ]
        );
    }

    #[test]
    fn test_closed_on_error() {
        let mut sensor = SimulatedSensor::new();
        sensor.fail_capture(true);
        {
            let mut session = SensorSession::open(&mut sensor, &config()).unwrap();
            assert!(session.capture_fresh().is_err());
        }
        assert!(!sensor.is_open());
        assert_eq!(sensor.close_count(), 1);
    }

    #[test]
    fn test_closed_when_open_fails() {
        let mut sensor = SimulatedSensor::new();
        sensor.fail_open_at(1);
        assert!(matches!(
            SensorSession::open(&mut sensor, &config()),
            Err(SensorError::OpenFailed(_))
        ));
        assert_eq!(sensor.close_count(), 1);
    }
}
