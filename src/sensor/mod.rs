//! Camera sensor access.
//!
//! This module provides a trait-based abstraction over the sensor hardware,
//! a scoped session that guarantees the hardware is released, a simulated
//! sensor for testing, and a placeholder for rigs without a sensor binding.

mod driver;
mod frame;
mod session;
mod simulated;
mod unattached;

pub use driver::{SensorDriver, SensorError};
pub use frame::{ChannelMeans, Frame};
pub use session::{SensorSession, SessionConfig};
pub use simulated::{SensorOp, SimulatedSensor};
pub use unattached::UnattachedSensor;
