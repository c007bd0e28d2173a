//! Dark-frame corrected image capture.
//!
//! Each capture takes a lit ("bright") and an unlit ("dark") exposure
//! through isolated worker processes and subtracts the two.

mod dark_frame;
mod engine;
mod worker;

pub use dark_frame::{subtract_dark_frame, subtract_saturating, uses_dark_frame};
pub use engine::{CaptureEngine, CaptureResult, EngineStats, Recalibration};
pub use worker::{CaptureInvocation, CaptureWorker, ProcessWorker, WorkerError};
