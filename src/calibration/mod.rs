//! Calibration state and the routines that produce it.
//!
//! The calibration record is persisted as a whole. Calibrators never modify
//! a record in place: they build a new one and hand it to the store only
//! once every step has succeeded.

mod gain;
mod record;
mod store;
mod white_balance;

pub use gain::GainCalibrator;
pub use record::{CalibrationRecord, GainState, GainTable, SensorGain, INITIAL_WHITE_BALANCE};
pub use store::{CalibrationStore, StoreError};
pub use white_balance::{WhiteBalanceCalibrator, WhiteBalanceParams};
