//! Math utilities for the Quad-Wheel Drive.
//!
//! This module provides the fixed lookup table that turns command codes into
//! per-wheel drive vectors.

pub mod drive;
