//! Command file written by the upstream flow (Node-RED).
//!
//! The file holds a single decimal command word, possibly surrounded by
//! whitespace. It is re-read from scratch every cycle.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use qwd_core::utils::{controllers::CommandSource, CommandCode};

#[derive(Debug)]
pub enum ReadError {
    /// The file does not exist (yet).
    Missing(PathBuf),
    /// The file exists but could not be read.
    Io(io::Error),
    /// The trimmed content is not made of decimal digits only.
    Malformed(String),
}

impl fmt::Display for ReadError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ReadError::Missing(path) => write!(f, "File not found at {}", path.display()),
            ReadError::Io(e) => write!(f, "Error reading file: {}", e),
            ReadError::Malformed(content) => write!(f, "Not a command word: {:?}", content),
        }
    }
}

impl std::error::Error for ReadError {}

/// Parse the content of a command file.
///
/// Digit strings too large for a `u32` saturate; they are outside the table
/// and therefore stop the robot like any other unknown code.
pub fn parse_command(content: &str) -> Result<CommandCode, ReadError> {
    let word = content.trim();
    if word.is_empty() || !word.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ReadError::Malformed(word.chars().take(32).collect()));
    }
    Ok(CommandCode(word.parse().unwrap_or(u32::MAX)))
}

/// Reads the command word from a text file.
pub struct FileCommandSource {
    path: PathBuf,
}

impl FileCommandSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CommandSource for FileCommandSource {
    type Error = ReadError;

    fn read_latest(&mut self) -> Result<CommandCode, ReadError> {
        let content = fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ReadError::Missing(self.path.clone()),
            _ => ReadError::Io(e),
        })?;
        parse_command(&content)
    }
}
