//! White-balance convergence.
//!
//! Red and blue gains are nudged by a fixed step until the red and blue
//! means of a reference region sit within tolerance of the green mean. The
//! loop always runs its full iteration count and has no guard against
//! oscillating around the target; gain calibration depends on the final
//! values, so the rule is kept exactly as is.

use super::{CalibrationRecord, CalibrationStore};
use crate::error::{CameraError, Result};
use crate::light::{LightController, LightGuard};
use crate::sensor::{ChannelMeans, SensorDriver, SensorSession, SessionConfig};
use crate::settings::{CameraSettings, LightChannel, WhiteBalanceGains};
use std::time::Duration;

/// Parameters of the convergence loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WhiteBalanceParams {
    /// Gains applied before the first iteration.
    pub start: WhiteBalanceGains,
    /// Number of capture/adjust iterations.
    pub iterations: u32,
    /// Gain change per iteration.
    pub step: f64,
    /// Largest mean difference left uncorrected.
    pub tolerance: f64,
}

impl Default for WhiteBalanceParams {
    fn default() -> Self {
        Self {
            start: super::INITIAL_WHITE_BALANCE,
            iterations: 30,
            step: 0.025,
            tolerance: 1.0,
        }
    }
}

impl WhiteBalanceParams {
    /// Moves `gain` one step so that `mean` approaches `green`.
    pub fn step_gain(&self, gain: f64, mean: f64, green: f64) -> f64 {
        if (mean - green).abs() > self.tolerance {
            if mean > green {
                gain - self.step
            } else {
                gain + self.step
            }
        } else {
            gain
        }
    }

    /// Applies one iteration of the rule to both gains.
    pub fn adjust(&self, gains: WhiteBalanceGains, means: &ChannelMeans) -> WhiteBalanceGains {
        WhiteBalanceGains {
            red: self.step_gain(gains.red, means.red, means.green),
            blue: self.step_gain(gains.blue, means.blue, means.green),
        }
    }
}

/// Finds red/blue gains that neutralise a lighting channel.
pub struct WhiteBalanceCalibrator<'a> {
    settings: &'a CameraSettings,
    params: WhiteBalanceParams,
    warmup: Duration,
}

impl<'a> WhiteBalanceCalibrator<'a> {
    /// Creates a calibrator with the default loop parameters.
    pub fn new(settings: &'a CameraSettings, warmup: Duration) -> Self {
        Self {
            settings,
            params: WhiteBalanceParams::default(),
            warmup,
        }
    }

    /// Overrides the loop parameters.
    pub fn with_params(mut self, params: WhiteBalanceParams) -> Self {
        self.params = params;
        self
    }

    /// Determines the gains for `channel`.
    ///
    /// Channels with a fixed default return it without touching hardware.
    pub fn calibrate<D, L>(
        &self,
        channel: LightChannel,
        rotation: u16,
        sensor: &mut D,
        lights: &mut L,
    ) -> Result<WhiteBalanceGains>
    where
        D: SensorDriver + ?Sized,
        L: LightController + ?Sized,
    {
        let channel_settings = self
            .settings
            .channel(channel)
            .ok_or(CameraError::ChannelNotAllowed(channel))?;

        if let Some(fixed) = channel_settings.default_white_balance {
            tracing::info!(
                channel = %channel,
                red = fixed.red,
                blue = fixed.blue,
                "Using fixed white balance"
            );
            return Ok(fixed);
        }

        tracing::info!(channel = %channel, "Warming up camera sensor");
        let mut light = LightGuard::on(lights, channel);

        let gains = {
            let config = SessionConfig {
                resolution: self.settings.white_balance_resolution,
                rotation,
                framerate: channel_settings.framerate,
                shutter_speed_us: channel_settings.shutter_speed_us,
                white_balance: self.params.start,
            };
            let mut session = SensorSession::open(sensor, &config)?;
            session.settle_and_freeze(self.warmup, self.settings.exposure_mode)?;
            self.converge(&mut session)?
        };

        light.off();
        tracing::info!(
            channel = %channel,
            red = gains.red,
            blue = gains.blue,
            "White balance calibrated"
        );
        Ok(gains)
    }

    /// Calibrates `channel` and persists the result as a new record.
    pub fn run<D, L>(
        &self,
        channel: LightChannel,
        store: &CalibrationStore,
        record: &CalibrationRecord,
        sensor: &mut D,
        lights: &mut L,
    ) -> Result<CalibrationRecord>
    where
        D: SensorDriver + ?Sized,
        L: LightController + ?Sized,
    {
        let gains = self.calibrate(channel, record.rotation, sensor, lights)?;
        let updated = record.with_white_balance(channel, gains);
        store.save(&updated)?;
        Ok(updated)
    }

    fn converge<D>(&self, session: &mut SensorSession<'_, D>) -> Result<WhiteBalanceGains>
    where
        D: SensorDriver + ?Sized,
    {
        let region = self.settings.white_balance_reference;
        let mut gains = self.params.start;

        for iteration in 0..self.params.iterations {
            let frame = session.capture_fresh()?;
            let means = frame
                .channel_means(&region)
                .ok_or(CameraError::RegionOutOfFrame {
                    width: frame.width(),
                    height: frame.height(),
                })?;

            tracing::debug!(
                iteration,
                red_gain = gains.red,
                blue_gain = gains.blue,
                r = means.red,
                g = means.green,
                b = means.blue,
                "White balance step"
            );

            gains = self.params.adjust(gains, &means);
            session.set_white_balance(gains)?;
        }

        Ok(gains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::LightLog;
    use crate::sensor::{SensorOp, SimulatedSensor};

    fn calibrator(settings: &CameraSettings) -> WhiteBalanceCalibrator<'_> {
        WhiteBalanceCalibrator::new(settings, Duration::ZERO)
    }

    #[test]
    fn test_step_direction() {
        let params = WhiteBalanceParams::default();
        assert_eq!(params.step_gain(1.0, 120.0, 100.0), 1.0 - 0.025);
        assert_eq!(params.step_gain(1.0, 80.0, 100.0), 1.0 + 0.025);
        assert_eq!(params.step_gain(1.0, 101.0, 100.0), 1.0);
        assert_eq!(params.step_gain(1.0, 99.0, 100.0), 1.0);
    }

    #[test]
    fn test_saturated_region_still_steps() {
        let params = WhiteBalanceParams::default();
        let means = ChannelMeans {
            red: 255.0,
            green: 255.0,
            blue: 0.0,
        };
        let gains = params.adjust(WhiteBalanceGains::new(1.1, 1.1), &means);
        assert_eq!(gains.red, 1.1);
        assert_eq!(gains.blue, 1.1 + 0.025);
    }

    #[test]
    fn test_trace_matches_step_rule() {
        let settings = CameraSettings::pi_cam_v21();
        let (scene_r, scene_g, scene_b) = (131.0, 104.0, 77.0);
        let mut sensor = SimulatedSensor::new().with_scene(scene_r, scene_g, scene_b);
        let mut lights = LightLog::new();

        let gains = calibrator(&settings)
            .calibrate(LightChannel::White, 0, &mut sensor, &mut lights)
            .unwrap();

        // Replay: the simulated sensor renders round(scene * gain).
        let (mut rg, mut bg) = (1.1_f64, 1.1_f64);
        for _ in 0..30 {
            let r = (scene_r * rg).round().clamp(0.0, 255.0);
            let g = scene_g;
            let b = (scene_b * bg).round().clamp(0.0, 255.0);
            if (r - g).abs() > 1.0 {
                if r > g {
                    rg -= 0.025;
                } else {
                    rg += 0.025;
                }
            }
            if (b - g).abs() > 1.0 {
                if b > g {
                    bg -= 0.025;
                } else {
                    bg += 0.025;
                }
            }
        }

        assert_eq!(gains.red.to_bits(), rg.to_bits());
        assert_eq!(gains.blue.to_bits(), bg.to_bits());
        assert_eq!(sensor.capture_count(), 30);
        assert!(lights.all_off());
    }

    #[test]
    fn test_converges_on_neutral_scene() {
        let settings = CameraSettings::pi_cam_v21();
        let mut sensor = SimulatedSensor::new().with_scene(100.0, 100.0, 100.0);
        let mut lights = LightLog::new();

        let gains = calibrator(&settings)
            .calibrate(LightChannel::White, 0, &mut sensor, &mut lights)
            .unwrap();

        assert!((gains.red - 1.0).abs() < 1e-9);
        assert!((gains.blue - 1.0).abs() < 1e-9);
        // No early exit once balanced.
        assert_eq!(sensor.capture_count(), 30);
    }

    #[test]
    fn test_exposure_frozen_before_first_capture() {
        let settings = CameraSettings::pi_cam_v21();
        let mut sensor = SimulatedSensor::new();
        let mut lights = LightLog::new();
        calibrator(&settings)
            .calibrate(LightChannel::White, 90, &mut sensor, &mut lights)
            .unwrap();

        let log = sensor.log();
        let frozen = log
            .iter()
            .position(|op| matches!(op, SensorOp::ExposureMode(_)))
            .unwrap();
        let first_capture = log.iter().position(|op| *op == SensorOp::Capture).unwrap();
        assert!(frozen < first_capture);
        assert!(log.contains(&SensorOp::Rotation(90)));
        assert_eq!(log.last(), Some(&SensorOp::Close));
    }

    #[test]
    fn test_fixed_channel_skips_hardware() {
        let settings = CameraSettings::pi_cam_v21();
        let mut sensor = SimulatedSensor::new();
        let mut lights = LightLog::new();

        let gains = calibrator(&settings)
            .calibrate(LightChannel::Growth, 0, &mut sensor, &mut lights)
            .unwrap();

        assert_eq!(gains, WhiteBalanceGains::new(0.4, 0.575));
        assert_eq!(sensor.open_count(), 0);
        assert!(lights.events().is_empty());
    }

    #[test]
    fn test_disallowed_channel_rejected() {
        let mut settings = CameraSettings::pi_cam_v21();
        settings.allowed_channels = vec![LightChannel::Growth];
        let mut sensor = SimulatedSensor::new();
        let mut lights = LightLog::new();

        let result = calibrator(&settings).calibrate(LightChannel::White, 0, &mut sensor, &mut lights);
        assert!(matches!(result, Err(CameraError::ChannelNotAllowed(LightChannel::White))));
        assert_eq!(sensor.open_count(), 0);
        assert!(lights.events().is_empty());
    }

    #[test]
    fn test_light_off_after_sensor_failure() {
        let settings = CameraSettings::pi_cam_v21();
        let mut sensor = SimulatedSensor::new();
        sensor.fail_capture(true);
        let mut lights = LightLog::new();

        let result = calibrator(&settings).calibrate(LightChannel::White, 0, &mut sensor, &mut lights);
        assert!(matches!(result, Err(CameraError::Sensor(_))));
        assert!(lights.all_off());
        assert!(!sensor.is_open());
    }
}
