//! Persisted calibration record.

use crate::settings::{CameraIdentity, CameraSettings, LightChannel, WhiteBalanceGains};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// White-balance gains used for a channel that has never been calibrated.
pub const INITIAL_WHITE_BALANCE: WhiteBalanceGains = WhiteBalanceGains::new(1.1, 1.1);

/// Analog and digital gain the sensor settled on. Always stored as a pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorGain {
    /// Analog gain multiplier.
    pub analog: f64,
    /// Digital gain multiplier.
    pub digital: f64,
}

impl SensorGain {
    /// Gain used before any measurement exists.
    pub const UNITY: SensorGain = SensorGain::new(1.0, 1.0);

    /// Creates a gain pair.
    pub const fn new(analog: f64, digital: f64) -> Self {
        Self { analog, digital }
    }

    /// Effective multiplicative gain applied to a capture.
    pub fn effective(&self) -> f64 {
        self.analog * self.digital
    }
}

/// Measured gains for every calibrated channel, with the time they were measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GainTable {
    /// When the gains were measured.
    pub measured_at: DateTime<Utc>,
    /// Gain per lighting channel.
    pub channels: BTreeMap<LightChannel, SensorGain>,
}

impl GainTable {
    /// Unity gain for each of `channels`, stamped with `now`.
    pub fn bootstrap(channels: &[LightChannel], now: DateTime<Utc>) -> Self {
        Self {
            measured_at: now,
            channels: channels.iter().map(|c| (*c, SensorGain::UNITY)).collect(),
        }
    }

    /// Gain for `channel`.
    pub fn get(&self, channel: LightChannel) -> Option<SensorGain> {
        self.channels.get(&channel).copied()
    }

    /// Returns true if the gains are older than `threshold` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now.signed_duration_since(self.measured_at) > threshold
    }
}

/// Whether gain data exists.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Option<GainTable>", into = "Option<GainTable>")]
pub enum GainState {
    /// No gain measurement has been made.
    #[default]
    Uncalibrated,
    /// Gains measured at a known time.
    Calibrated(GainTable),
}

impl GainState {
    /// The gain table, if calibrated.
    pub fn table(&self) -> Option<&GainTable> {
        match self {
            GainState::Uncalibrated => None,
            GainState::Calibrated(table) => Some(table),
        }
    }
}

impl From<Option<GainTable>> for GainState {
    fn from(table: Option<GainTable>) -> Self {
        table.map_or(GainState::Uncalibrated, GainState::Calibrated)
    }
}

impl From<GainState> for Option<GainTable> {
    fn from(state: GainState) -> Self {
        match state {
            GainState::Uncalibrated => None,
            GainState::Calibrated(table) => Some(table),
        }
    }
}

/// Calibration state of one camera, persisted as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// Hardware class this record was measured on.
    pub camera_identity: CameraIdentity,
    /// Image rotation in degrees.
    #[serde(default)]
    pub rotation: u16,
    /// Manual white-balance gains per channel.
    #[serde(default)]
    pub white_balance: BTreeMap<LightChannel, WhiteBalanceGains>,
    /// Sensor gain measurements.
    #[serde(default)]
    pub gain: GainState,
}

impl CalibrationRecord {
    /// A record with no gain data.
    ///
    /// White balance is seeded from each channel's fixed default, or from the
    /// convergence starting point for channels without one.
    pub fn uncalibrated(settings: &CameraSettings) -> Self {
        let white_balance = settings
            .allowed_channels
            .iter()
            .filter_map(|channel| {
                let defaults = settings.channels.get(channel)?;
                let gains = defaults
                    .default_white_balance
                    .unwrap_or(INITIAL_WHITE_BALANCE);
                Some((*channel, gains))
            })
            .collect();

        Self {
            camera_identity: settings.identity,
            rotation: 0,
            white_balance,
            gain: GainState::Uncalibrated,
        }
    }

    /// White balance to apply under `channel`.
    pub fn white_balance_for(&self, channel: LightChannel) -> WhiteBalanceGains {
        self.white_balance
            .get(&channel)
            .copied()
            .unwrap_or(INITIAL_WHITE_BALANCE)
    }

    /// Copy of this record with `table` as its gain data.
    pub fn with_gain(&self, table: GainTable) -> Self {
        Self {
            gain: GainState::Calibrated(table),
            ..self.clone()
        }
    }

    /// Copy of this record with new white balance for `channel`.
    pub fn with_white_balance(&self, channel: LightChannel, gains: WhiteBalanceGains) -> Self {
        let mut record = self.clone();
        record.white_balance.insert(channel, gains);
        record
    }
}
