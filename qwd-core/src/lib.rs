//! Core drive mapping, servo channels and control loop for the Quad-Wheel Drive
//! node on no-std platforms.
//!
//! The `control-node` binary in `qwd-app/pi-node` wires these pieces to real
//! hardware on a Raspberry Pi.
#![no_std]

pub mod utils;
