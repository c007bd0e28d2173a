//! Plant Camera Calibration and Capture Library
//!
//! Drives a plant-monitoring camera rig: selects a lighting channel,
//! captures dark-frame corrected images, and keeps sensor gain and white
//! balance calibrated so images stay radiometrically comparable over time.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────── CaptureEngine ────────────────┐
//!                 │                                               │
//! settings → calibration (store, gain, white balance) → capture (worker, dark frame)
//!                 │                     │                         │
//!                 └──── sensor session ─┘──── light controller ───┘
//! ```
//!
//! # Design Principles
//!
//! - **Whole-record persistence**: calibration results are written once, atomically, after a run succeeds
//! - **Scoped hardware**: sensor sessions and lit channels are released on every exit path
//! - **Process isolation**: every exposure runs in a fresh worker process with a hard deadline
//! - **Immutable settings**: per-model settings are values handed to each component
//!
//! # Example
//!
//! ```no_run
//! use plant_camera::{
//!     CameraSettings, CaptureEngine, LightChannel, LightLog, ProcessWorker, RigConfig,
//!     SimulatedSensor,
//! };
//!
//! let config = RigConfig::default();
//! let worker = ProcessWorker::new(&config.capture_program, config.timing.worker_timeout());
//! let mut engine = CaptureEngine::new(
//!     CameraSettings::pi_cam_v21(),
//!     config,
//!     SimulatedSensor::new(),
//!     LightLog::new(),
//!     worker,
//! )
//! .unwrap();
//!
//! let result = engine.capture(LightChannel::Growth).unwrap();
//! println!("{}x{} at gain {}", result.image.width(), result.image.height(), result.gain);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod calibration;
pub mod capture;
pub mod error;
pub mod light;
pub mod metrics;
pub mod sensor;
pub mod settings;

// Re-export commonly used types at crate root
pub use calibration::{CalibrationRecord, CalibrationStore, GainState, GainTable, SensorGain};
pub use capture::{CaptureEngine, CaptureResult, CaptureWorker, ProcessWorker, Recalibration};
pub use error::{CameraError, Result};
pub use light::{LightController, LightLog};
pub use sensor::{Frame, SensorDriver, SimulatedSensor, UnattachedSensor};
pub use settings::{CameraSettings, LightChannel, RigConfig};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
