//! Sensor gain calibration.
//!
//! Headless captures cannot keep the sensor open long enough for automatic
//! gain control to settle, so the gains it converges on are measured here,
//! per lighting channel, and replayed by the capture worker.

use super::{CalibrationRecord, CalibrationStore, GainState, GainTable};
use crate::error::{CameraError, Result};
use crate::light::{LightController, LightGuard};
use crate::sensor::{SensorDriver, SensorSession, SessionConfig};
use crate::settings::{CameraSettings, LightChannel};
use chrono::Utc;
use std::time::Duration;

/// Measures analog and digital gain for each active lighting channel.
pub struct GainCalibrator<'a> {
    settings: &'a CameraSettings,
    channels: &'a [LightChannel],
    settle: Duration,
}

impl<'a> GainCalibrator<'a> {
    /// Creates a calibrator measuring `channels` after `settle`.
    pub fn new(settings: &'a CameraSettings, channels: &'a [LightChannel], settle: Duration) -> Self {
        Self {
            settings,
            channels,
            settle,
        }
    }

    /// Gives an uncalibrated record unity gain for every allowed channel and persists it.
    ///
    /// Calibrated records are returned unchanged.
    pub fn bootstrap(
        &self,
        store: &CalibrationStore,
        record: &CalibrationRecord,
    ) -> Result<CalibrationRecord> {
        if let GainState::Calibrated(_) = record.gain {
            return Ok(record.clone());
        }

        let table = GainTable::bootstrap(&self.settings.allowed_channels, Utc::now());
        let bootstrapped = record.with_gain(table);
        store.save(&bootstrapped)?;
        tracing::info!("Initialized gain data with unity gain");
        Ok(bootstrapped)
    }

    /// Measures gains for every channel without persisting anything.
    ///
    /// Channels not measured keep their previous values. With no channel to
    /// measure the previous table, including its timestamp, is returned as is.
    pub fn measure<D, L>(
        &self,
        record: &CalibrationRecord,
        sensor: &mut D,
        lights: &mut L,
    ) -> Result<GainTable>
    where
        D: SensorDriver + ?Sized,
        L: LightController + ?Sized,
    {
        if self.channels.is_empty() {
            tracing::warn!("No light channel enabled, gains left unmeasured");
            return Ok(record.gain.table().cloned().unwrap_or_else(|| {
                GainTable::bootstrap(&self.settings.allowed_channels, Utc::now())
            }));
        }

        let mut channels = record
            .gain
            .table()
            .map(|table| table.channels.clone())
            .unwrap_or_default();

        for &channel in self.channels {
            let channel_settings = self
                .settings
                .channel(channel)
                .ok_or(CameraError::ChannelNotAllowed(channel))?;

            let mut light = LightGuard::on(lights, channel);
            tracing::info!(channel = %channel, "Letting gains settle");

            let gain = {
                let config = SessionConfig {
                    resolution: self.settings.resolution,
                    rotation: record.rotation,
                    framerate: channel_settings.framerate,
                    shutter_speed_us: channel_settings.shutter_speed_us,
                    white_balance: record.white_balance_for(channel),
                };
                let mut session = SensorSession::open(sensor, &config)?;
                session.settle_and_freeze(self.settle, self.settings.exposure_mode)?;
                session.read_gain()?
            };

            light.off();
            tracing::info!(
                channel = %channel,
                analog = gain.analog,
                digital = gain.digital,
                "Measured gain"
            );
            channels.insert(channel, gain);
        }

        Ok(GainTable {
            measured_at: Utc::now(),
            channels,
        })
    }

    /// Measures all channels and persists the new record in one write.
    ///
    /// A failure on any channel returns before anything is written.
    pub fn run<D, L>(
        &self,
        store: &CalibrationStore,
        record: &CalibrationRecord,
        sensor: &mut D,
        lights: &mut L,
    ) -> Result<CalibrationRecord>
    where
        D: SensorDriver + ?Sized,
        L: LightController + ?Sized,
    {
        let table = self.measure(record, sensor, lights)?;
        let updated = record.with_gain(table);
        store.save(&updated)?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::SensorGain;
    use crate::light::LightLog;
    use crate::sensor::{SensorOp, SimulatedSensor};
    use crate::settings::{Framerate, WhiteBalanceGains};

    static CHANNELS: [LightChannel; 2] = [LightChannel::White, LightChannel::Growth];

    fn store_in(dir: &tempfile::TempDir, settings: &CameraSettings) -> CalibrationStore {
        CalibrationStore::new(
            dir.path().join("config.toml"),
            settings.identity,
            settings.allowed_channels.clone(),
        )
    }

    fn sensor() -> SimulatedSensor {
        SimulatedSensor::new()
            .with_gain_for_shutter(400_000, 2.5, 1.0)
            .with_gain_for_shutter(4_000, 1.25, 1.5)
    }

    #[test]
    fn test_measures_each_channel() {
        let settings = CameraSettings::pi_cam_v21();
        let calibrator = GainCalibrator::new(&settings, &CHANNELS, Duration::ZERO);
        let record = CalibrationRecord::uncalibrated(&settings);
        let mut sensor = sensor();
        let mut lights = LightLog::new();

        let table = calibrator.measure(&record, &mut sensor, &mut lights).unwrap();

        assert_eq!(table.get(LightChannel::White), Some(SensorGain::new(2.5, 1.0)));
        assert_eq!(table.get(LightChannel::Growth), Some(SensorGain::new(1.25, 1.5)));
        assert_eq!(sensor.open_count(), 2);
        assert_eq!(sensor.close_count(), 2);
        assert_eq!(
            lights.events(),
            &[
                (LightChannel::White, true),
                (LightChannel::White, false),
                (LightChannel::Growth, true),
                (LightChannel::Growth, false),
            ]
        );
    }

    #[test]
    fn test_session_uses_stored_white_balance() {
        let settings = CameraSettings::pi_cam_v21();
        let calibrator = GainCalibrator::new(&settings, &CHANNELS[..1], Duration::ZERO);
        let record = CalibrationRecord::uncalibrated(&settings)
            .with_white_balance(LightChannel::White, WhiteBalanceGains::new(1.6, 1.3));
        let mut sensor = sensor();
        let mut lights = LightLog::new();

        calibrator.measure(&record, &mut sensor, &mut lights).unwrap();

        assert_eq!(
            &sensor.log()[..7],
            &[
                SensorOp::Open,
                SensorOp::Resolution(settings.resolution),
                SensorOp::Rotation(0),
                SensorOp::Framerate(Framerate::new(10, 4)),
                SensorOp::ShutterSpeed(400_000),
                SensorOp::WhiteBalance(WhiteBalanceGains::new(1.6, 1.3)),
                SensorOp::ExposureMode(settings.exposure_mode),
            ]
        );
    }

    #[test]
    fn test_bootstrap_creates_unity_gain_for_allowed_channels() {
        let dir = tempfile::tempdir().unwrap();
        let settings = CameraSettings::pi_cam_v21();
        let store = store_in(&dir, &settings);
        let calibrator = GainCalibrator::new(&settings, &CHANNELS[1..], Duration::ZERO);

        let before = Utc::now();
        let record = calibrator
            .bootstrap(&store, &CalibrationRecord::uncalibrated(&settings))
            .unwrap();

        let table = record.gain.table().unwrap();
        assert!(table.measured_at >= before);
        for channel in &settings.allowed_channels {
            assert_eq!(table.get(*channel), Some(SensorGain::UNITY));
        }
        assert_eq!(store.load().unwrap(), record);
    }

    #[test]
    fn test_failure_mid_run_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let settings = CameraSettings::pi_cam_v21();
        let store = store_in(&dir, &settings);
        let calibrator = GainCalibrator::new(&settings, &CHANNELS, Duration::ZERO);

        let original = calibrator
            .bootstrap(&store, &CalibrationRecord::uncalibrated(&settings))
            .unwrap();
        let bytes_before = std::fs::read(store.path()).unwrap();

        let mut sensor = sensor();
        sensor.fail_open_at(2);
        let mut lights = LightLog::new();
        let result = calibrator.run(&store, &original, &mut sensor, &mut lights);

        assert!(matches!(result, Err(CameraError::Sensor(_))));
        assert_eq!(std::fs::read(store.path()).unwrap(), bytes_before);
        assert_eq!(store.load().unwrap(), original);
        assert!(lights.all_off());
    }

    #[test]
    fn test_unmeasured_channels_keep_previous_gain() {
        let settings = CameraSettings::pi_cam_v21();
        let calibrator = GainCalibrator::new(&settings, &CHANNELS[1..], Duration::ZERO);
        let mut table = GainTable::bootstrap(&settings.allowed_channels, Utc::now());
        table
            .channels
            .insert(LightChannel::White, SensorGain::new(4.0, 1.0));
        let record = CalibrationRecord::uncalibrated(&settings).with_gain(table);
        let mut sensor = sensor();
        let mut lights = LightLog::new();

        let measured = calibrator.measure(&record, &mut sensor, &mut lights).unwrap();
        assert_eq!(measured.get(LightChannel::White), Some(SensorGain::new(4.0, 1.0)));
        assert_eq!(measured.get(LightChannel::Growth), Some(SensorGain::new(1.25, 1.5)));
    }

    #[test]
    fn test_no_enabled_channel_keeps_timestamp() {
        let settings = CameraSettings::pi_cam_v21();
        let calibrator = GainCalibrator::new(&settings, &[], Duration::ZERO);
        let measured_at = Utc::now() - chrono::Duration::hours(30);
        let table = GainTable::bootstrap(&settings.allowed_channels, measured_at);
        let record = CalibrationRecord::uncalibrated(&settings).with_gain(table.clone());
        let mut sensor = sensor();
        let mut lights = LightLog::new();

        let measured = calibrator.measure(&record, &mut sensor, &mut lights).unwrap();

        assert_eq!(measured, table);
        assert!(sensor.log().is_empty());
        assert!(lights.events().is_empty());
    }
}
