//! Metrics collection and registry.

use crate::calibration::{CalibrationRecord, CalibrationStore};
use crate::capture::EngineStats;
use crate::settings::{CameraSettings, LightChannel};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Metric creation, registration or encoding failed.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of rig state for metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Whether gain data exists.
    pub is_calibrated: bool,
    /// Age of the gain data in seconds.
    pub gain_age_secs: Option<f64>,
    /// Effective gain per channel.
    pub effective_gain: Vec<(LightChannel, f64)>,
    /// Successful captures.
    pub captures: u64,
    /// Failed captures.
    pub capture_failures: u64,
    /// Worker timeouts.
    pub worker_timeouts: u64,
    /// Completed gain calibrations.
    pub gain_calibrations: u64,
    /// Failed gain calibrations.
    pub gain_calibration_failures: u64,
    /// Completed white-balance calibrations.
    pub white_balance_calibrations: u64,
}

/// Prometheus metrics registry for the camera rig.
pub struct MetricsRegistry {
    registry: Registry,

    // Calibration state
    calibrated: IntGauge,
    gain_age_secs: Gauge,
    effective_gain: GaugeVec,

    // Activity counters
    captures_total: IntCounter,
    capture_failures_total: IntCounter,
    worker_timeouts_total: IntCounter,
    gain_calibrations_total: IntCounter,
    gain_calibration_failures_total: IntCounter,
    white_balance_calibrations_total: IntCounter,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all rig metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        Self::build(true)
    }

    /// Creates a registry exposing only the calibration gauges.
    ///
    /// For processes that watch the calibration file but never capture, so
    /// activity counters would never move.
    pub fn calibration_only() -> Result<Self, MetricsError> {
        Self::build(false)
    }

    fn build(with_activity: bool) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let calibrated = IntGauge::new(
            "plant_camera_calibrated",
            "Whether gain calibration data exists (1=yes, 0=no)",
        )?;
        let gain_age_secs = Gauge::new(
            "plant_camera_gain_age_seconds",
            "Seconds since gains were last measured",
        )?;
        let effective_gain = GaugeVec::new(
            Opts::new(
                "plant_camera_effective_gain",
                "Analog times digital gain used for captures",
            ),
            &["channel"],
        )?;

        let captures_total = IntCounter::new(
            "plant_camera_captures_total",
            "Total number of successful captures",
        )?;
        let capture_failures_total = IntCounter::new(
            "plant_camera_capture_failures_total",
            "Total number of failed captures",
        )?;
        let worker_timeouts_total = IntCounter::new(
            "plant_camera_worker_timeouts_total",
            "Total number of capture workers that exceeded their deadline",
        )?;
        let gain_calibrations_total = IntCounter::new(
            "plant_camera_gain_calibrations_total",
            "Total number of completed gain calibrations",
        )?;
        let gain_calibration_failures_total = IntCounter::new(
            "plant_camera_gain_calibration_failures_total",
            "Total number of failed gain calibrations",
        )?;
        let white_balance_calibrations_total = IntCounter::new(
            "plant_camera_white_balance_calibrations_total",
            "Total number of completed white-balance calibrations",
        )?;

        registry.register(Box::new(calibrated.clone()))?;
        registry.register(Box::new(gain_age_secs.clone()))?;
        registry.register(Box::new(effective_gain.clone()))?;
        if with_activity {
            registry.register(Box::new(captures_total.clone()))?;
            registry.register(Box::new(capture_failures_total.clone()))?;
            registry.register(Box::new(worker_timeouts_total.clone()))?;
            registry.register(Box::new(gain_calibrations_total.clone()))?;
            registry.register(Box::new(gain_calibration_failures_total.clone()))?;
            registry.register(Box::new(white_balance_calibrations_total.clone()))?;
        }

        Ok(Self {
            registry,
            calibrated,
            gain_age_secs,
            effective_gain,
            captures_total,
            capture_failures_total,
            worker_timeouts_total,
            gain_calibrations_total,
            gain_calibration_failures_total,
            white_balance_calibrations_total,
        })
    }

    /// Updates all metrics from a snapshot of rig state.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.calibrated.set(if snapshot.is_calibrated { 1 } else { 0 });
        if let Some(age) = snapshot.gain_age_secs {
            self.gain_age_secs.set(age);
        }
        for (channel, gain) in &snapshot.effective_gain {
            self.effective_gain
                .with_label_values(&[channel.as_str()])
                .set(*gain);
        }

        // Counters only move forward by the difference
        advance(&self.captures_total, snapshot.captures);
        advance(&self.capture_failures_total, snapshot.capture_failures);
        advance(&self.worker_timeouts_total, snapshot.worker_timeouts);
        advance(&self.gain_calibrations_total, snapshot.gain_calibrations);
        advance(
            &self.gain_calibration_failures_total,
            snapshot.gain_calibration_failures,
        );
        advance(
            &self.white_balance_calibrations_total,
            snapshot.white_balance_calibrations,
        );
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

impl MetricsSnapshot {
    /// Creates a snapshot from the engine's counters and calibration record.
    pub fn from_engine(stats: &EngineStats, record: &CalibrationRecord, now: DateTime<Utc>) -> Self {
        let table = record.gain.table();
        let gain_age_secs = table.map(|t| {
            now.signed_duration_since(t.measured_at).num_milliseconds() as f64 / 1000.0
        });
        let effective_gain = table
            .map(|t| {
                t.channels
                    .iter()
                    .map(|(channel, gain)| (*channel, gain.effective()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            is_calibrated: table.is_some(),
            gain_age_secs,
            effective_gain,
            captures: stats.captures,
            capture_failures: stats.capture_failures,
            worker_timeouts: stats.worker_timeouts,
            gain_calibrations: stats.gain_calibrations,
            gain_calibration_failures: stats.gain_calibration_failures,
            white_balance_calibrations: stats.white_balance_calibrations,
        }
    }

    /// Creates a snapshot of the calibration file as it is on disk now.
    ///
    /// A missing or unusable file reads as uncalibrated. Activity counters
    /// are zero.
    pub fn from_store(store: &CalibrationStore, settings: &CameraSettings, now: DateTime<Utc>) -> Self {
        let record = store.load().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Calibration file unusable for metrics");
            CalibrationRecord::uncalibrated(settings)
        });
        Self::from_engine(&EngineStats::default(), &record, now)
    }
}
