//! Status output for the node: a single self-overwriting console line, JSON
//! lines for other processes, or nothing.
//!
//! Timestamps are UTC wall-clock time; the node does not read the local
//! time zone.

use std::{
    io::{self, Write},
    time::{SystemTime, UNIX_EPOCH},
};

use clap::ValueEnum;
use qwd_core::utils::controllers::{CycleReport, LoopState, StatusSink};
use serde::Serialize;

/// Move the cursor up one line and clear it.
const CLEAR_PREVIOUS_LINE: &str = "\x1b[A\x1b[K";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusMode {
    Console,
    Json,
    Quiet,
}

/// Wall-clock `HH:MM:SS` in UTC.
pub fn clock_time(now: SystemTime) -> String {
    let secs = now.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs()) % 86_400;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Console status line, e.g. `[12:00:01] Word: 1 -> **FORWARD**`.
pub fn status_line(
    time: &str,
    report: &CycleReport,
) -> String {
    format!("[{}] Word: {} -> **{}**", time, report.code, report.label())
}

/// Console error line, e.g. `[ERROR] File not found at /tmp/cmd`.
pub fn error_line(error: &dyn core::fmt::Display) -> String {
    format!("[ERROR] {}", error)
}

#[derive(Serialize)]
struct JsonStatus<'a> {
    time: String,
    label: &'static str,
    #[serde(flatten)]
    report: &'a CycleReport,
}

pub struct StatusOutput {
    mode: StatusMode,
    /// Lines printed since the last error; these get overwritten.
    line_count: usize,
}

impl StatusOutput {
    pub fn new(mode: StatusMode) -> Self {
        Self {
            mode,
            line_count: 0,
        }
    }

    pub fn banner(
        &self,
        control_file: &std::path::Path,
        backend: &str,
    ) {
        if self.mode != StatusMode::Console {
            return;
        }
        println!("--- Quad-Wheel Drive control node ---");
        println!("File Path: {}", control_file.display());
        println!("Mode: 4-Motor PWM ({}) with Signal Detach for Neutral Safety", backend);
    }

    pub fn notice(
        &mut self,
        message: &str,
    ) {
        if self.mode == StatusMode::Console {
            println!("\n[INFO] {}", message);
            self.line_count = 0;
        }
    }
}

impl StatusSink for StatusOutput {
    fn report(
        &mut self,
        report: &CycleReport,
    ) {
        let time = clock_time(SystemTime::now());
        let mut out = io::stdout().lock();
        let written = match self.mode {
            StatusMode::Console => {
                for _ in 0..self.line_count {
                    let _ = write!(out, "{}", CLEAR_PREVIOUS_LINE);
                }
                self.line_count = 1;
                writeln!(out, "{}", status_line(&time, report))
            }
            StatusMode::Json => {
                let status = JsonStatus {
                    time,
                    label: report.label(),
                    report,
                };
                match serde_json::to_string(&status) {
                    Ok(line) => writeln!(out, "{}", line),
                    Err(e) => {
                        tracing::warn!(?e, "status serialization failed");
                        Ok(())
                    }
                }
            }
            StatusMode::Quiet => Ok(()),
        };
        if let Err(e) = written.and_then(|_| out.flush()) {
            tracing::debug!(?e, "status output dropped");
        }
    }

    fn read_failed(
        &mut self,
        error: &dyn core::fmt::Display,
    ) {
        match self.mode {
            StatusMode::Console => {
                eprintln!("\r{}", error_line(error));
                self.line_count = 0;
            }
            StatusMode::Json => {
                let event = serde_json::json!({
                    "time": clock_time(SystemTime::now()),
                    "event": "read_error",
                    "error": error.to_string(),
                });
                println!("{}", event);
            }
            StatusMode::Quiet => {}
        }
    }

    fn stopping(
        &mut self,
        state: LoopState,
    ) {
        if state == LoopState::Interrupted {
            self.notice("Interrupted by user. Stopping motors...");
        }
    }
}
