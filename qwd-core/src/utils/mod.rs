//! Utility re-exports for the Quad-Wheel Drive.
//!
//! - `controllers`: servo channels, PCA9685 output lines and the control loop
//! - `math`: the command-code to drive-vector table

pub mod controllers;
pub mod math;

pub use controllers::{ControlLoop, LoopState};
pub use embassy_time::{Duration, Instant};
pub use math::drive::{CommandCode, DriveVector, Maneuver};
