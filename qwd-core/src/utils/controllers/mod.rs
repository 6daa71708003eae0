//! Module Exports
//!
//! This file exports the drive control system for the Quad-Wheel Drive.
//!
//! - `servo`: servo channels with detach-on-zero output.
//! - `pca9685`: PCA9685 board lines usable as servo outputs.
//!
//! [`ControlLoop`] ties a [`CommandSource`], the drive table and the four
//! channels together and runs until cancelled.

pub mod pca9685;
pub mod servo;

use embassy_sync::{
    blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex},
    signal::Signal,
};
use embassy_time::{Duration, Instant, TimeoutError};
use heapless::Vec;
use serde::Serialize;

pub use servo::{
    ActuatorChannel, ChannelError, ChannelState, Position, PulseOutput, PulseWidth,
    ServoCalibration,
};

use crate::utils::math::drive::{CommandCode, DriveVector, Maneuver, SAFE_STOP};

/// Signal raised to stop a running [`ControlLoop`].
pub static CANCEL: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Default pause between two cycles.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(500);

/// Supplies the latest command code.
pub trait CommandSource {
    type Error: core::fmt::Debug + core::fmt::Display;

    fn read_latest(&mut self) -> Result<CommandCode, Self::Error>;
}

/// Receives one report per cycle. Sinks cannot fail the loop.
pub trait StatusSink {
    fn report(
        &mut self,
        report: &CycleReport,
    );

    /// Called when the command source could not be read this cycle.
    fn read_failed(
        &mut self,
        _error: &dyn core::fmt::Display,
    ) {
    }

    /// Called once the loop has left `Running` through cancellation, before
    /// the channels are shut down.
    fn stopping(
        &mut self,
        _state: LoopState,
    ) {
    }
}

/// What a single cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CycleReport {
    /// Milliseconds since boot.
    pub uptime_ms: u64,
    pub code: CommandCode,
    pub maneuver: Maneuver,
    pub vector: DriveVector,
    /// `false` when the code was substituted after a read failure.
    pub command_ok: bool,
}

impl CycleReport {
    pub fn label(&self) -> &'static str {
        self.maneuver.label()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Running,
    Interrupted,
    Terminated,
}

/// A channel could not be brought up; nothing was left running.
#[derive(Debug)]
pub struct InitializationError<E: core::fmt::Debug> {
    pub position: Position,
    pub error: ChannelError<E>,
}

impl<E: core::fmt::Debug> core::fmt::Display for InitializationError<E> {
    fn fmt(
        &self,
        f: &mut core::fmt::Formatter<'_>,
    ) -> core::fmt::Result {
        write!(f, "failed to initialize {} channel: {}", self.position, self.error)
    }
}

/// Release failures collected while shutting down.
#[derive(Debug)]
pub struct ShutdownReport<E: core::fmt::Debug> {
    pub failures: Vec<(Position, ChannelError<E>), 4>,
}

impl<E: core::fmt::Debug> ShutdownReport<E> {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A channel refused a drive value while running. The loop was shut down.
#[derive(Debug)]
pub struct LoopError<E: core::fmt::Debug> {
    pub position: Position,
    pub error: ChannelError<E>,
    pub shutdown: ShutdownReport<E>,
}

impl<E: core::fmt::Debug> core::fmt::Display for LoopError<E> {
    fn fmt(
        &self,
        f: &mut core::fmt::Formatter<'_>,
    ) -> core::fmt::Result {
        write!(f, "{} channel failed: {}", self.position, self.error)
    }
}

/// Summary of a loop that ended through cancellation.
#[derive(Debug)]
pub struct LoopOutcome<E: core::fmt::Debug> {
    pub cycles: u32,
    pub read_failures: u32,
    pub state: LoopState,
    pub shutdown: ShutdownReport<E>,
}

/// Owns the four wheel channels and runs the read → map → apply → report cycle.
pub struct ControlLoop<O: PulseOutput> {
    channels: Vec<ActuatorChannel<O>, 4>,
    period: Duration,
    state: LoopState,
    cycles: u32,
    read_failures: u32,
}

impl<O, E> ControlLoop<O>
where
    O: PulseOutput<Error = E>,
    E: core::fmt::Debug,
{
    /// Acquire and detach all four outputs, in `Position::ALL` order.
    ///
    /// If any position fails, every channel brought up before it is shut
    /// down again before the error is returned.
    pub fn initialize<F>(
        mut acquire: F,
        calibration: ServoCalibration,
        period: Duration,
    ) -> Result<Self, InitializationError<E>>
    where
        F: FnMut(Position) -> Result<O, E>,
    {
        let mut channels: Vec<ActuatorChannel<O>, 4> = Vec::new();

        for position in Position::ALL {
            let ready = acquire(position)
                .map_err(ChannelError::Output)
                .and_then(|output| ActuatorChannel::initialize(position, output, calibration));

            match ready {
                // capacity equals Position::ALL.len()
                Ok(channel) => {
                    let _ = channels.push(channel);
                }
                Err(error) => {
                    tracing::error!(%position, "channel initialization failed: {}", error);
                    for ch in channels.iter_mut() {
                        if let Err(e) = ch.shutdown() {
                            tracing::warn!(position = %ch.position(), "release failed: {}", e);
                        }
                    }
                    return Err(InitializationError { position, error });
                }
            }
        }

        tracing::info!(period_ms = period.as_millis(), "all channels ready");
        Ok(Self {
            channels,
            period,
            state: LoopState::Running,
            cycles: 0,
            read_failures: 0,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn read_failures(&self) -> u32 {
        self.read_failures
    }

    pub fn channel(
        &self,
        position: Position,
    ) -> Option<&ActuatorChannel<O>> {
        self.channels.get(position.index())
    }

    /// Current state of every channel in `Position::ALL` order.
    pub fn channel_states(&self) -> [ChannelState; 4] {
        Position::ALL.map(|p| {
            self.channel(p)
                .map_or(ChannelState::Detached, ActuatorChannel::state)
        })
    }

    /// Drive all four channels to `vector`.
    ///
    /// Stops at the first channel that fails and returns its position.
    pub fn apply(
        &mut self,
        vector: DriveVector,
    ) -> Result<(), (Position, ChannelError<E>)> {
        for (ch, value) in self.channels.iter_mut().zip(vector.to_array()) {
            ch.apply(value).map_err(|e| (ch.position(), e))?;
        }
        Ok(())
    }

    /// Run one read → map → apply → report cycle.
    ///
    /// A command that cannot be read is replaced by the stop code.
    pub fn cycle<S, K>(
        &mut self,
        source: &mut S,
        sink: &mut K,
    ) -> Result<CycleReport, (Position, ChannelError<E>)>
    where
        S: CommandSource,
        K: StatusSink,
    {
        let (code, command_ok) = match source.read_latest() {
            Ok(code) => (code, true),
            Err(error) => {
                self.read_failures = self.read_failures.saturating_add(1);
                tracing::warn!(%error, "command read failed, stopping");
                sink.read_failed(&error);
                (SAFE_STOP, false)
            }
        };

        let maneuver = Maneuver::from_code(code);
        let vector = maneuver.vector();
        self.apply(vector)?;
        self.cycles = self.cycles.saturating_add(1);

        let report = CycleReport {
            uptime_ms: Instant::now().as_millis(),
            code,
            maneuver,
            vector,
            command_ok,
        };
        tracing::debug!(code = code.0, %maneuver, "cycle applied");
        sink.report(&report);
        Ok(report)
    }

    /// Detach and release every channel, continuing past failures.
    ///
    /// The loop is `Terminated` afterwards; calling this again is harmless.
    pub fn shutdown(&mut self) -> ShutdownReport<E> {
        let mut failures = Vec::new();
        for ch in self.channels.iter_mut() {
            if let Err(e) = ch.shutdown() {
                tracing::warn!(position = %ch.position(), "channel release failed: {}", e);
                let _ = failures.push((ch.position(), e));
            }
        }
        self.state = LoopState::Terminated;
        ShutdownReport { failures }
    }

    /// Cycle every `period` until `cancel` is signalled, then shut down.
    ///
    /// The pause between cycles is cut short by the signal. A channel that
    /// fails while driving ends the loop with every channel shut down.
    pub async fn run<S, K, M>(
        &mut self,
        source: &mut S,
        sink: &mut K,
        cancel: &Signal<M, ()>,
    ) -> Result<LoopOutcome<E>, LoopError<E>>
    where
        S: CommandSource,
        K: StatusSink,
        M: RawMutex,
    {
        while self.state == LoopState::Running {
            if cancel.signaled() {
                self.state = LoopState::Interrupted;
                break;
            }

            if let Err((position, error)) = self.cycle(source, sink) {
                tracing::error!(%position, "drive failed: {}", error);
                let shutdown = self.shutdown();
                return Err(LoopError {
                    position,
                    error,
                    shutdown,
                });
            }

            match embassy_time::with_timeout(self.period, cancel.wait()).await {
                Ok(()) => self.state = LoopState::Interrupted,
                Err(TimeoutError) => {}
            }
        }

        let final_state = self.state;
        tracing::info!(?final_state, cycles = self.cycles, "control loop stopping");
        sink.stopping(final_state);
        let shutdown = self.shutdown();
        Ok(LoopOutcome {
            cycles: self.cycles,
            read_failures: self.read_failures,
            state: final_state,
            shutdown,
        })
    }
}
