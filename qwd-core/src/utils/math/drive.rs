//! Drive table for four-wheeled robots with one servo per wheel.
//!
//! `Maneuver::from_code` selects a row of the table and `Maneuver::vector`
//! yields the per-wheel target values in `[-1.0, 1.0]`, ordered front-left,
//! front-right, rear-left, rear-right. Right-side servos are mounted mirrored,
//! so their sign is inverted relative to the left side.
//!
//! # Example
//! ```rust
//! use qwd_core::utils::math::drive::{map, CommandCode};
//! let (vector, label) = map(CommandCode(1));
//! assert_eq!(label, "FORWARD");
//! assert_eq!(vector.fl, 0.725);
//! ```
//!
use serde::Serialize;

/// Nominal full speed for a single wheel.
pub const MAX_SPEED: f32 = 0.5;
/// Base magnitude for a forward-spinning wheel.
pub const FORWARD: f32 = MAX_SPEED;
/// Base magnitude for a backward-spinning wheel.
pub const BACKWARD: f32 = -MAX_SPEED;

/// Raw command word read from the command source.
///
/// Only `1..=8` select motion; everything else stops the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct CommandCode(pub u32);

/// Code substituted whenever the command source cannot be read.
pub const SAFE_STOP: CommandCode = CommandCode(0);

impl From<u32> for CommandCode {
    fn from(value: u32) -> Self {
        CommandCode(value)
    }
}

impl core::fmt::Display for CommandCode {
    fn fmt(
        &self,
        f: &mut core::fmt::Formatter<'_>,
    ) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Target values for the four wheels.
///
/// A vector is always built whole by [`Maneuver::vector`]; callers replace it
/// each cycle rather than editing components.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DriveVector {
    pub fl: f32,
    pub fr: f32,
    pub rl: f32,
    pub rr: f32,
}

impl DriveVector {
    /// All four wheels detached.
    pub const STOP: DriveVector = DriveVector::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(
        fl: f32,
        fr: f32,
        rl: f32,
        rr: f32,
    ) -> Self {
        Self { fl, fr, rl, rr }
    }

    /// Components in channel order (FL, FR, RL, RR).
    pub const fn to_array(self) -> [f32; 4] {
        [self.fl, self.fr, self.rl, self.rr]
    }
}

/// One row of the drive table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Maneuver {
    Stop,
    Forward,
    Backward,
    Left,
    Right,
    TurnLeft,
    TurnRight,
    DiagonalLeft,
    DiagonalRight,
}

impl Maneuver {
    /// Every row, in code order starting at `0`.
    pub const ALL: [Maneuver; 9] = [
        Maneuver::Stop,
        Maneuver::Forward,
        Maneuver::Backward,
        Maneuver::Left,
        Maneuver::Right,
        Maneuver::TurnLeft,
        Maneuver::TurnRight,
        Maneuver::DiagonalLeft,
        Maneuver::DiagonalRight,
    ];

    /// Select the table row for `code`. Unknown codes stop the robot.
    pub const fn from_code(code: CommandCode) -> Self {
        match code.0 {
            1 => Maneuver::Forward,
            2 => Maneuver::Backward,
            3 => Maneuver::Left,
            4 => Maneuver::Right,
            5 => Maneuver::TurnLeft,
            6 => Maneuver::TurnRight,
            7 => Maneuver::DiagonalLeft,
            8 => Maneuver::DiagonalRight,
            _ => Maneuver::Stop,
        }
    }

    /// Wheel targets for this maneuver.
    ///
    /// The 1.45, 1.3 and 1.5 multipliers compensate for skew between the
    /// physical servos and must stay exactly as written.
    pub fn vector(self) -> DriveVector {
        match self {
            Maneuver::Forward => {
                DriveVector::new(FORWARD * 1.45, -FORWARD, FORWARD * 1.45, -FORWARD)
            }
            Maneuver::Backward => {
                DriveVector::new(BACKWARD, -BACKWARD * 1.3, BACKWARD, -BACKWARD * 1.3)
            }
            Maneuver::Left => DriveVector::new(
                FORWARD * 1.5,
                -BACKWARD * 1.5,
                BACKWARD * 0.5,
                -FORWARD * 0.5,
            ),
            Maneuver::Right => DriveVector::new(
                BACKWARD * 0.5,
                -FORWARD * 0.5,
                FORWARD * 1.5,
                -BACKWARD * 1.5,
            ),
            Maneuver::TurnLeft => DriveVector::new(
                BACKWARD * 1.5,
                -FORWARD * 1.5,
                BACKWARD * 1.5,
                -FORWARD * 1.5,
            ),
            Maneuver::TurnRight => DriveVector::new(
                FORWARD * 1.5,
                -BACKWARD * 1.5,
                FORWARD * 1.5,
                -BACKWARD * 1.5,
            ),
            Maneuver::DiagonalLeft => DriveVector::new(0.0, -FORWARD * 0.5, FORWARD * 1.5, 0.0),
            Maneuver::DiagonalRight => DriveVector::new(FORWARD * 1.5, -0.0, 0.0, -FORWARD * 0.5),
            Maneuver::Stop => DriveVector::STOP,
        }
    }

    /// Human-readable label shown in the status line.
    pub const fn label(self) -> &'static str {
        match self {
            Maneuver::Stop => "STOP",
            Maneuver::Forward => "FORWARD",
            Maneuver::Backward => "BACKWARD",
            Maneuver::Left => "LEFT",
            Maneuver::Right => "RIGHT",
            Maneuver::TurnLeft => "TURN-LEFT",
            Maneuver::TurnRight => "TURN-RIGHT",
            Maneuver::DiagonalLeft => "DIAGONAL-LEFT",
            Maneuver::DiagonalRight => "DIAGONAL-RIGHT",
        }
    }
}

impl core::fmt::Display for Maneuver {
    fn fmt(
        &self,
        f: &mut core::fmt::Formatter<'_>,
    ) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Map a command code to its drive vector and label.
pub fn map(code: CommandCode) -> (DriveVector, &'static str) {
    let maneuver = Maneuver::from_code(code);
    (maneuver.vector(), maneuver.label())
}
