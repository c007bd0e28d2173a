//! Prometheus metrics exporter for the camera rig.
//!
//! This module exposes calibration state and capture activity in
//! Prometheus format, optionally via an HTTP endpoint.
//!
//! # Metrics Exposed
//!
//! ## Calibration
//! - `plant_camera_calibrated` - Whether gain data exists (1=yes, 0=no)
//! - `plant_camera_gain_age_seconds` - Seconds since gains were measured
//! - `plant_camera_effective_gain{channel}` - Analog × digital gain per channel
//!
//! ## Activity
//! - `plant_camera_captures_total` - Successful captures
//! - `plant_camera_capture_failures_total` - Failed captures
//! - `plant_camera_worker_timeouts_total` - Capture workers past their deadline
//! - `plant_camera_gain_calibrations_total` - Completed gain calibrations
//! - `plant_camera_gain_calibration_failures_total` - Failed gain calibrations
//! - `plant_camera_white_balance_calibrations_total` - Completed white-balance calibrations
//!
//! # Example
//!
//! ```no_run
//! use plant_camera::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//!
//! let snapshot = MetricsSnapshot {
//!     is_calibrated: true,
//!     gain_age_secs: Some(600.0),
//!     captures: 12,
//!     ..Default::default()
//! };
//!
//! registry.update(&snapshot);
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError};
