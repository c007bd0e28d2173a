//! Capture orchestration.
//!
//! The engine owns the sensor, the light controller, the capture worker and
//! the calibration record. All operations take `&mut self`, so at most one
//! sensor, light or worker operation is ever in flight.

use super::dark_frame::{subtract_dark_frame, uses_dark_frame};
use super::worker::{CaptureInvocation, CaptureWorker};
use crate::calibration::{
    CalibrationRecord, CalibrationStore, GainCalibrator, StoreError, WhiteBalanceCalibrator,
};
use crate::error::{CameraError, Result};
use crate::light::{LightController, LightGuard};
use crate::sensor::{Frame, SensorDriver};
use crate::settings::{CameraSettings, LightChannel, RigConfig, WhiteBalanceGains};
use chrono::{DateTime, Utc};
use std::path::Path;

/// Preview time given to the capture program before the still is taken.
const PREVIEW_MS: u32 = 1000;

/// Outcome of the recalibration pass that follows a capture.
#[derive(Debug, Clone, PartialEq)]
pub enum Recalibration {
    /// Gain data was fresh.
    NotNeeded,
    /// Gain data was stale and has been re-measured.
    Completed,
    /// Gain data was stale and re-measuring failed; the old data is kept.
    Failed(String),
}

/// A corrected image and the gain it was taken with.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    /// RGB image, dark-frame corrected where the channel calls for it.
    pub image: Frame,
    /// Effective gain (analog × digital) used for the exposure.
    pub gain: f64,
    /// Channel the image was captured under.
    pub channel: LightChannel,
    /// What happened to stale gain data after the capture.
    pub recalibration: Recalibration,
}

/// Counters describing the engine's activity since start-up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStats {
    /// Successful captures.
    pub captures: u64,
    /// Failed captures.
    pub capture_failures: u64,
    /// Worker invocations that hit their deadline.
    pub worker_timeouts: u64,
    /// Completed gain calibrations.
    pub gain_calibrations: u64,
    /// Failed gain calibrations.
    pub gain_calibration_failures: u64,
    /// Completed white-balance calibrations.
    pub white_balance_calibrations: u64,
}

/// Entry point for calibration and capture on one camera rig.
pub struct CaptureEngine<D, L, W> {
    settings: CameraSettings,
    config: RigConfig,
    channels: Vec<LightChannel>,
    store: CalibrationStore,
    record: CalibrationRecord,
    sensor: D,
    lights: L,
    worker: W,
    stats: EngineStats,
}

impl<D, L, W> CaptureEngine<D, L, W>
where
    D: SensorDriver,
    L: LightController,
    W: CaptureWorker,
{
    /// Creates an engine and loads the calibration record.
    ///
    /// A missing or unusable record leaves the camera uncalibrated. An
    /// invalid timing configuration is rejected before anything is loaded.
    pub fn new(
        settings: CameraSettings,
        config: RigConfig,
        sensor: D,
        lights: L,
        worker: W,
    ) -> Result<Self> {
        config.timing.validate()?;
        let channels = config.active_channels(&settings);
        let store = CalibrationStore::new(
            config.calibration_file.clone(),
            settings.identity,
            settings.allowed_channels.clone(),
        );

        let record = match store.load() {
            Ok(record) => {
                tracing::info!(path = %store.path().display(), "Loaded camera calibration");
                record
            }
            Err(StoreError::NotFound(path)) => {
                tracing::warn!(path = %path.display(), "No camera calibration found, starting uncalibrated");
                CalibrationRecord::uncalibrated(&settings)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Camera calibration unusable, starting uncalibrated");
                CalibrationRecord::uncalibrated(&settings)
            }
        };

        Ok(Self {
            settings,
            config,
            channels,
            store,
            record,
            sensor,
            lights,
            worker,
            stats: EngineStats::default(),
        })
    }

    /// Current calibration record.
    pub fn record(&self) -> &CalibrationRecord {
        &self.record
    }

    /// Returns true if gain data exists.
    pub fn is_calibrated(&self) -> bool {
        self.record.gain.table().is_some()
    }

    /// Camera model settings.
    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    /// Rig configuration.
    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    /// Store backing the calibration record.
    pub fn store(&self) -> &CalibrationStore {
        &self.store
    }

    /// Channels calibrated by [`update`](Self::update).
    pub fn active_channels(&self) -> &[LightChannel] {
        &self.channels
    }

    /// The sensor driver.
    pub fn sensor(&self) -> &D {
        &self.sensor
    }

    /// The light controller.
    pub fn lights(&self) -> &L {
        &self.lights
    }

    /// The capture worker.
    pub fn worker(&self) -> &W {
        &self.worker
    }

    /// Activity counters.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Measures and persists gains for every active channel.
    ///
    /// An uncalibrated record is first given unity gain and persisted.
    pub fn update(&mut self) -> Result<()> {
        let calibrator = GainCalibrator::new(
            &self.settings,
            &self.channels,
            self.config.timing.gain_settle(),
        );

        if self.record.gain.table().is_none() {
            self.record = calibrator.bootstrap(&self.store, &self.record)?;
        }

        match calibrator.run(&self.store, &self.record, &mut self.sensor, &mut self.lights) {
            Ok(record) => {
                self.record = record;
                self.stats.gain_calibrations += 1;
                tracing::info!("Gain calibration saved");
                Ok(())
            }
            Err(e) => {
                self.stats.gain_calibration_failures += 1;
                tracing::error!(error = %e, "Gain calibration failed, keeping previous gains");
                Err(e)
            }
        }
    }

    /// Calibrates and persists white balance for `channel`.
    pub fn calibrate_white_balance(&mut self, channel: LightChannel) -> Result<WhiteBalanceGains> {
        self.ensure_allowed(channel)?;
        let calibrator =
            WhiteBalanceCalibrator::new(&self.settings, self.config.timing.white_balance_warmup());
        let record = calibrator.run(
            channel,
            &self.store,
            &self.record,
            &mut self.sensor,
            &mut self.lights,
        )?;
        let gains = record.white_balance_for(channel);
        self.record = record;
        self.stats.white_balance_calibrations += 1;
        Ok(gains)
    }

    /// Captures a corrected image under `channel`.
    ///
    /// Gain data is measured first if none exists. If it is older than the
    /// staleness threshold it is re-measured after the image has been
    /// composed; the outcome is reported in [`CaptureResult::recalibration`].
    pub fn capture(&mut self, channel: LightChannel) -> Result<CaptureResult> {
        self.ensure_allowed(channel)?;

        if !self.is_calibrated() {
            tracing::info!("No gain data, calibrating before capture");
            self.update()?;
        }

        let result = self.expose(channel);
        let (image, gain) = match result {
            Ok(captured) => {
                self.stats.captures += 1;
                captured
            }
            Err(e) => {
                self.stats.capture_failures += 1;
                if e.is_timeout() {
                    self.stats.worker_timeouts += 1;
                }
                tracing::error!(channel = %channel, error = %e, "Capture failed");
                return Err(e);
            }
        };

        let recalibration = if self.is_stale(Utc::now()) {
            tracing::info!("Gain data is stale, recalibrating");
            match self.update() {
                Ok(()) => Recalibration::Completed,
                Err(e) => Recalibration::Failed(e.to_string()),
            }
        } else {
            Recalibration::NotNeeded
        };

        Ok(CaptureResult {
            image,
            gain,
            channel,
            recalibration,
        })
    }

    /// Returns true if gain data is missing or older than the threshold at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.record
            .gain
            .table()
            .map_or(true, |t| t.is_stale(now, self.config.timing.staleness()))
    }

    fn ensure_allowed(&self, channel: LightChannel) -> Result<()> {
        if self.settings.channel(channel).is_some() {
            Ok(())
        } else {
            Err(CameraError::ChannelNotAllowed(channel))
        }
    }

    fn expose(&mut self, channel: LightChannel) -> Result<(Frame, f64)> {
        let sensor_gain = self
            .record
            .gain
            .table()
            .and_then(|table| table.get(channel))
            .ok_or(CameraError::MissingGain(channel))?;
        let channel_settings = self
            .settings
            .channel(channel)
            .ok_or(CameraError::ChannelNotAllowed(channel))?;

        let invocation = CaptureInvocation {
            resolution: self.settings.resolution,
            shutter_speed_us: channel_settings.shutter_speed_us,
            white_balance: self.record.white_balance_for(channel),
            gain: sensor_gain,
            preview_ms: PREVIEW_MS,
        };

        std::fs::create_dir_all(&self.config.scratch_dir)?;
        let bright_path = self.config.scratch_dir.join("bright.bmp");
        let dark_path = self.config.scratch_dir.join("dark.bmp");
        remove_stale(&bright_path)?;
        remove_stale(&dark_path)?;

        {
            let mut light = LightGuard::on(&mut self.lights, channel);
            self.worker.capture(&invocation, &bright_path)?;
            light.off();
        }
        self.worker.capture(&invocation, &dark_path)?;

        let bright = load_frame(&bright_path)?;
        let image = if uses_dark_frame(channel) {
            let dark = load_frame(&dark_path)?;
            subtract_dark_frame(&bright, &dark)?
        } else {
            bright
        };

        tracing::info!(
            channel = %channel,
            gain = sensor_gain.effective(),
            width = image.width(),
            height = image.height(),
            "Captured image"
        );
        Ok((image, sensor_gain.effective()))
    }
}

fn remove_stale(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn load_frame(path: &Path) -> Result<Frame> {
    let image = image::open(path)
        .map_err(|source| CameraError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();
    let (width, height) = image.dimensions();
    Ok(Frame::new(image.into_raw(), width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{GainState, GainTable, SensorGain};
    use crate::light::LightLog;
    use crate::sensor::SimulatedSensor;
    use crate::capture::WorkerError;
    use crate::settings::TimingConfig;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Worker that writes a fixed bright or dark image instead of running a program.
    struct FakeWorker {
        bright: Frame,
        dark: Frame,
        calls: Vec<PathBuf>,
        fail_with_timeout: bool,
        fail_with_spawn: bool,
    }

    impl FakeWorker {
        fn new(bright: [u8; 3], dark: [u8; 3]) -> Self {
            Self {
                bright: Frame::filled(4, 2, bright),
                dark: Frame::filled(4, 2, dark),
                calls: Vec::new(),
                fail_with_timeout: false,
                fail_with_spawn: false,
            }
        }
    }

    impl CaptureWorker for FakeWorker {
        fn capture(
            &mut self,
            _invocation: &CaptureInvocation,
            output: &Path,
        ) -> std::result::Result<(), WorkerError> {
            self.calls.push(output.to_path_buf());
            if self.fail_with_spawn {
                return Err(WorkerError::Spawn {
                    program: PathBuf::from("raspistill"),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            if self.fail_with_timeout {
                return Err(WorkerError::Timeout {
                    timeout: Duration::from_secs(20),
                });
            }
            let frame = if self.calls.len() % 2 == 1 {
                &self.bright
            } else {
                &self.dark
            };
            image::RgbImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
                .unwrap()
                .save(output)
                .unwrap();
            Ok(())
        }
    }

    fn config_in(dir: &tempfile::TempDir) -> RigConfig {
        RigConfig {
            calibration_file: dir.path().join("config.toml"),
            scratch_dir: dir.path().join("tmp"),
            light_channels: vec![LightChannel::White, LightChannel::Growth],
            timing: TimingConfig::immediate(),
            ..Default::default()
        }
    }

    fn engine(
        dir: &tempfile::TempDir,
        worker: FakeWorker,
    ) -> CaptureEngine<SimulatedSensor, LightLog, FakeWorker> {
        let sensor = SimulatedSensor::new()
            .with_gain_for_shutter(400_000, 2.0, 1.5)
            .with_gain_for_shutter(4_000, 1.25, 1.0);
        CaptureEngine::new(
            CameraSettings::pi_cam_v21(),
            config_in(dir),
            sensor,
            LightLog::new(),
            worker,
        )
        .unwrap()
    }

    fn seed_record(dir: &tempfile::TempDir, measured_at: DateTime<Utc>) -> CalibrationRecord {
        let settings = CameraSettings::pi_cam_v21();
        let mut table = GainTable::bootstrap(&settings.allowed_channels, measured_at);
        table
            .channels
            .insert(LightChannel::White, SensorGain::new(3.0, 1.0));
        let record = CalibrationRecord::uncalibrated(&settings).with_gain(table);
        CalibrationStore::new(
            dir.path().join("config.toml"),
            settings.identity,
            settings.allowed_channels.clone(),
        )
        .save(&record)
        .unwrap();
        record
    }

    #[test]
    fn test_white_capture_subtracts_dark_frame() {
        let dir = tempfile::tempdir().unwrap();
        seed_record(&dir, Utc::now());
        let mut engine = engine(&dir, FakeWorker::new([10, 20, 5], [3, 3, 3]));

        let result = engine.capture(LightChannel::White).unwrap();

        assert_eq!(&result.image.pixels()[..3], &[7, 17, 2]);
        assert_eq!(result.gain, 3.0);
        assert_eq!(result.recalibration, Recalibration::NotNeeded);
        assert_eq!(engine.worker().calls.len(), 2);
        assert_eq!(engine.sensor().open_count(), 0);
        assert_eq!(
            engine.lights().events(),
            &[(LightChannel::White, true), (LightChannel::White, false)]
        );
    }

    #[test]
    fn test_dark_frame_saturates() {
        let dir = tempfile::tempdir().unwrap();
        seed_record(&dir, Utc::now());
        let mut engine = engine(&dir, FakeWorker::new([10, 2, 5], [3, 9, 3]));

        let result = engine.capture(LightChannel::White).unwrap();
        assert_eq!(&result.image.pixels()[..3], &[7, 0, 2]);
    }

    #[test]
    fn test_growth_capture_keeps_bright_frame() {
        let dir = tempfile::tempdir().unwrap();
        seed_record(&dir, Utc::now());
        let mut engine = engine(&dir, FakeWorker::new([10, 20, 5], [200, 200, 200]));

        let result = engine.capture(LightChannel::Growth).unwrap();

        assert_eq!(&result.image.pixels()[..3], &[10, 20, 5]);
        assert_eq!(result.channel, LightChannel::Growth);
        // The dark exposure is still taken.
        assert_eq!(engine.worker().calls.len(), 2);
    }

    #[test]
    fn test_capture_bootstraps_gain_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir, FakeWorker::new([10, 20, 5], [3, 3, 3]));
        assert!(!engine.is_calibrated());

        let before = Utc::now();
        let result = engine.capture(LightChannel::White).unwrap();

        let table = engine.record().gain.table().unwrap();
        assert!(table.measured_at >= before);
        assert_eq!(table.get(LightChannel::White), Some(SensorGain::new(2.0, 1.5)));
        assert_eq!(result.gain, 3.0);
        assert_eq!(engine.sensor().open_count(), 2);
        assert_eq!(engine.stats().gain_calibrations, 1);

        let stored = CalibrationStore::new(
            dir.path().join("config.toml"),
            engine.settings().identity,
            engine.settings().allowed_channels.clone(),
        )
        .load()
        .unwrap();
        assert_eq!(&stored, engine.record());
    }

    #[test]
    fn test_bootstrap_persisted_even_if_measurement_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir, FakeWorker::new([10, 20, 5], [3, 3, 3]));
        engine.sensor.fail_open_at(1);

        assert!(matches!(
            engine.capture(LightChannel::White),
            Err(CameraError::Sensor(_))
        ));
        assert!(engine.worker().calls.is_empty());

        let stored = CalibrationStore::new(
            dir.path().join("config.toml"),
            engine.settings().identity,
            engine.settings().allowed_channels.clone(),
        )
        .load()
        .unwrap();
        let table = stored.gain.table().unwrap();
        for channel in &engine.settings().allowed_channels {
            assert_eq!(table.get(*channel), Some(SensorGain::UNITY));
        }
        assert!(engine.lights().all_off());
    }

    #[test]
    fn test_stale_gain_triggers_recalibration() {
        let dir = tempfile::tempdir().unwrap();
        let measured = Utc::now() - chrono::Duration::hours(25);
        seed_record(&dir, measured);
        let mut engine = engine(&dir, FakeWorker::new([10, 20, 5], [3, 3, 3]));
        assert!(engine.is_stale(Utc::now()));

        let result = engine.capture(LightChannel::White).unwrap();

        // The image was taken with the old gain.
        assert_eq!(result.gain, 3.0);
        assert_eq!(&result.image.pixels()[..3], &[7, 17, 2]);
        assert_eq!(result.recalibration, Recalibration::Completed);
        assert_eq!(engine.sensor().open_count(), 2);

        let table = engine.record().gain.table().unwrap();
        assert!(table.measured_at > measured);
        assert_eq!(table.get(LightChannel::White), Some(SensorGain::new(2.0, 1.5)));
    }

    #[test]
    fn test_failed_recalibration_still_returns_image() {
        let dir = tempfile::tempdir().unwrap();
        let original = seed_record(&dir, Utc::now() - chrono::Duration::hours(48));
        let mut engine = engine(&dir, FakeWorker::new([10, 20, 5], [3, 3, 3]));
        engine.sensor.fail_open_at(2);

        let result = engine.capture(LightChannel::White).unwrap();

        assert!(matches!(result.recalibration, Recalibration::Failed(_)));
        assert_eq!(engine.record(), &original);
        assert_eq!(engine.stats().gain_calibration_failures, 1);
    }

    #[test]
    fn test_worker_timeout_restores_light() {
        let dir = tempfile::tempdir().unwrap();
        seed_record(&dir, Utc::now());
        let mut worker = FakeWorker::new([10, 20, 5], [3, 3, 3]);
        worker.fail_with_timeout = true;
        let mut engine = engine(&dir, worker);

        let result = engine.capture(LightChannel::White);

        assert!(matches!(result, Err(ref e) if e.is_timeout()));
        assert_eq!(engine.worker().calls.len(), 1);
        assert!(!engine.lights().is_on(LightChannel::White));
        assert_eq!(engine.stats().worker_timeouts, 1);
        assert_eq!(engine.stats().capture_failures, 1);
    }

    #[test]
    fn test_worker_spawn_failure_restores_light() {
        let dir = tempfile::tempdir().unwrap();
        seed_record(&dir, Utc::now());
        let mut worker = FakeWorker::new([10, 20, 5], [3, 3, 3]);
        worker.fail_with_spawn = true;
        let mut engine = engine(&dir, worker);

        let result = engine.capture(LightChannel::White);

        assert!(matches!(
            result,
            Err(CameraError::Worker(WorkerError::Spawn { .. }))
        ));
        assert_eq!(engine.worker().calls.len(), 1);
        assert!(engine.lights().all_off());
        assert_eq!(engine.stats().worker_timeouts, 0);
        assert_eq!(engine.stats().capture_failures, 1);
    }

    #[test]
    fn test_oversized_timing_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(&dir);
        config.timing.worker_timeout_secs = 1e30;

        let result = CaptureEngine::new(
            CameraSettings::pi_cam_v21(),
            config,
            SimulatedSensor::new(),
            LightLog::new(),
            FakeWorker::new([1, 1, 1], [0, 0, 0]),
        );

        assert!(matches!(result, Err(CameraError::Config(_))));
    }

    #[test]
    fn test_disallowed_channel_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = CameraSettings::pi_cam_v21();
        settings.allowed_channels = vec![LightChannel::Growth];
        let mut engine = CaptureEngine::new(
            settings,
            config_in(&dir),
            SimulatedSensor::new(),
            LightLog::new(),
            FakeWorker::new([1, 1, 1], [0, 0, 0]),
        )
        .unwrap();

        assert!(matches!(
            engine.capture(LightChannel::White),
            Err(CameraError::ChannelNotAllowed(LightChannel::White))
        ));
        assert!(matches!(
            engine.calibrate_white_balance(LightChannel::White),
            Err(CameraError::ChannelNotAllowed(LightChannel::White))
        ));
        assert_eq!(engine.sensor().open_count(), 0);
        assert!(engine.lights().events().is_empty());
        assert!(engine.worker().calls.is_empty());
        assert!(!dir.path().join("config.toml").exists());
    }

    #[test]
    fn test_unattached_sensor_captures_with_stored_gains() {
        let dir = tempfile::tempdir().unwrap();
        seed_record(&dir, Utc::now() - chrono::Duration::hours(25));
        let before = std::fs::read_to_string(dir.path().join("config.toml")).unwrap();
        let mut engine = CaptureEngine::new(
            CameraSettings::pi_cam_v21(),
            config_in(&dir),
            crate::sensor::UnattachedSensor,
            LightLog::new(),
            FakeWorker::new([10, 20, 5], [3, 3, 3]),
        )
        .unwrap();

        let result = engine.capture(LightChannel::White).unwrap();

        assert_eq!(&result.image.pixels()[..3], &[7, 17, 2]);
        assert!(matches!(result.recalibration, Recalibration::Failed(_)));
        assert!(engine.lights().all_off());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("config.toml")).unwrap(),
            before
        );
    }

    #[test]
    fn test_white_balance_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(&dir, FakeWorker::new([1, 1, 1], [0, 0, 0]));

        let gains = engine.calibrate_white_balance(LightChannel::White).unwrap();

        assert_eq!(engine.record().white_balance_for(LightChannel::White), gains);
        assert_eq!(engine.record().gain, GainState::Uncalibrated);
        let stored: CalibrationRecord =
            toml::from_str(&std::fs::read_to_string(dir.path().join("config.toml")).unwrap())
                .unwrap();
        assert_eq!(stored.white_balance_for(LightChannel::White), gains);
        assert_eq!(engine.stats().white_balance_calibrations, 1);
    }

    #[test]
    fn test_identity_mismatch_starts_uncalibrated() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = seed_record(&dir, Utc::now());
        record.camera_identity = crate::settings::CameraIdentity(9);
        std::fs::write(
            dir.path().join("config.toml"),
            toml::to_string(&record).unwrap(),
        )
        .unwrap();

        let engine = engine(&dir, FakeWorker::new([1, 1, 1], [0, 0, 0]));
        assert!(!engine.is_calibrated());
    }
}
