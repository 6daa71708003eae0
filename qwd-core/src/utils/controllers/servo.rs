//! Servo channels for the Quad-Wheel Drive.
//!
//! Each wheel is driven by a continuous-rotation hobby servo. A channel either
//! emits a periodic pulse encoding a speed in `[-1.0, 1.0]`, or is *detached*
//! and emits nothing at all. Detaching is how a wheel is stopped: a neutral
//! pulse can still make some servos creep or hold torque.

use serde::Serialize;

/// Physical position of a wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
}

impl Position {
    /// Channel order used by drive vectors and the control loop.
    pub const ALL: [Position; 4] = [
        Position::FrontLeft,
        Position::FrontRight,
        Position::RearLeft,
        Position::RearRight,
    ];

    pub const fn index(self) -> usize {
        match self {
            Position::FrontLeft => 0,
            Position::FrontRight => 1,
            Position::RearLeft => 2,
            Position::RearRight => 3,
        }
    }

    pub const fn short_name(self) -> &'static str {
        match self {
            Position::FrontLeft => "fl",
            Position::FrontRight => "fr",
            Position::RearLeft => "rl",
            Position::RearRight => "rr",
        }
    }
}

impl core::fmt::Display for Position {
    fn fmt(
        &self,
        f: &mut core::fmt::Formatter<'_>,
    ) -> core::fmt::Result {
        f.write_str(self.short_name())
    }
}

/// One servo frame: a high pulse of `high_us` inside a `period_us` period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PulseWidth {
    pub period_us: u32,
    pub high_us: u32,
}

/// Pulse limits of the attached servos.
///
/// Defaults are the common 1–2 ms pulse in a 20 ms (50 Hz) frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoCalibration {
    pub min_pulse_us: u32,
    pub max_pulse_us: u32,
    pub frame_us: u32,
}

impl Default for ServoCalibration {
    fn default() -> Self {
        Self {
            min_pulse_us: 1_000,
            max_pulse_us: 2_000,
            frame_us: 20_000,
        }
    }
}

impl ServoCalibration {
    /// Encode `value` as a pulse: `-1.0` is the minimum width, `1.0` the maximum.
    ///
    /// Returns `None` for non-finite values or values outside `[-1.0, 1.0]`.
    pub fn pulse_for(
        &self,
        value: f32,
    ) -> Option<PulseWidth> {
        if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
            return None;
        }
        let span = (self.max_pulse_us - self.min_pulse_us) as f32;
        let high = self.min_pulse_us as f32 + (value + 1.0) / 2.0 * span;
        Some(PulseWidth {
            period_us: self.frame_us,
            high_us: libm::roundf(high) as u32,
        })
    }

    /// Frame rate in Hz.
    pub fn frame_hz(&self) -> f32 {
        1_000_000.0 / self.frame_us as f32
    }
}

/// A single PWM line able to emit servo pulses or go silent.
pub trait PulseOutput {
    type Error: core::fmt::Debug;

    /// Start (or keep) emitting `pulse` every frame.
    fn set_pulse(
        &mut self,
        pulse: PulseWidth,
    ) -> Result<(), Self::Error>;

    /// Stop emitting any signal; the line is held inactive.
    fn detach(&mut self) -> Result<(), Self::Error>;

    /// Give the line back to the platform. Called once, after `detach`.
    fn release(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// What a channel is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum ChannelState {
    /// No signal at all.
    Detached,
    /// Emitting a pulse for a non-zero value.
    Active(f32),
}

impl ChannelState {
    pub fn is_detached(&self) -> bool {
        matches!(self, ChannelState::Detached)
    }
}

/// Errors raised by a single channel.
#[derive(Debug)]
pub enum ChannelError<E: core::fmt::Debug> {
    /// The underlying output rejected the request.
    Output(E),
    /// The value is not finite or lies outside `[-1.0, 1.0]`.
    BadValue(f32),
    /// The channel was already shut down.
    Released,
}

impl<E: core::fmt::Debug> core::fmt::Display for ChannelError<E> {
    fn fmt(
        &self,
        f: &mut core::fmt::Formatter<'_>,
    ) -> core::fmt::Result {
        match self {
            ChannelError::Output(e) => write!(f, "output error: {:?}", e),
            ChannelError::BadValue(v) => write!(f, "value {} outside [-1, 1]", v),
            ChannelError::Released => f.write_str("channel already released"),
        }
    }
}

/// One wheel's servo output together with its detach-on-zero state.
///
/// Dropping a channel shuts it down.
pub struct ActuatorChannel<O: PulseOutput> {
    position: Position,
    output: Option<O>,
    calibration: ServoCalibration,
    state: ChannelState,
}

impl<O, E> ActuatorChannel<O>
where
    O: PulseOutput<Error = E>,
    E: core::fmt::Debug,
{
    /// Take ownership of `output` and make sure it starts out silent.
    ///
    /// On failure the output is still released before the error is returned.
    pub fn initialize(
        position: Position,
        mut output: O,
        calibration: ServoCalibration,
    ) -> Result<Self, ChannelError<E>> {
        if let Err(e) = output.detach() {
            if let Err(release) = output.release() {
                tracing::warn!(%position, ?release, "release after failed init also failed");
            }
            return Err(ChannelError::Output(e));
        }
        tracing::info!(%position, "servo channel initialized (detached)");
        Ok(Self {
            position,
            output: Some(output),
            calibration,
            state: ChannelState::Detached,
        })
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_released(&self) -> bool {
        self.output.is_none()
    }

    /// Drive the channel to `value`.
    ///
    /// Exactly `0.0` (either sign) detaches the output instead of sending a
    /// neutral pulse. Re-applying the current value does not touch hardware.
    pub fn apply(
        &mut self,
        value: f32,
    ) -> Result<(), ChannelError<E>> {
        let output = self.output.as_mut().ok_or(ChannelError::Released)?;

        if value == 0.0 {
            if !self.state.is_detached() {
                output.detach().map_err(ChannelError::Output)?;
                self.state = ChannelState::Detached;
            }
            return Ok(());
        }

        if self.state == ChannelState::Active(value) {
            return Ok(());
        }
        let pulse = self
            .calibration
            .pulse_for(value)
            .ok_or(ChannelError::BadValue(value))?;
        output.set_pulse(pulse).map_err(ChannelError::Output)?;
        self.state = ChannelState::Active(value);
        Ok(())
    }

    /// Detach and release the output. Later calls do nothing.
    ///
    /// The channel reports `Detached` afterwards even if the hardware call
    /// failed; the first error encountered is returned.
    pub fn shutdown(&mut self) -> Result<(), ChannelError<E>> {
        let Some(mut output) = self.output.take() else {
            return Ok(());
        };
        self.state = ChannelState::Detached;

        let detached = output.detach();
        let released = output.release();
        tracing::info!(position = %self.position, "servo channel released");
        detached.and(released).map_err(ChannelError::Output)
    }
}

impl<O: PulseOutput> Drop for ActuatorChannel<O> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(position = %self.position, "release on drop failed: {}", e);
        }
    }
}
