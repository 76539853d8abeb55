//! Error types shared across the crate.
//!
//! All fallible operations in this crate return [`Result`]. The variants
//! mirror how failures are handled at the command level: argument problems
//! and parse failures abort the command, I/O errors propagate from the
//! underlying streams, and invariant violations indicate either a bug or a
//! corrupt index file.

use std::fmt;
use std::io;

/// Errors produced by index construction, loading, and queries
#[derive(Debug)]
pub enum Error {
    /// A caller-supplied parameter is out of range or inconsistent
    InvalidArgument(String),
    /// Malformed input data (color file line, record framing, file format)
    Parse(String),
    /// I/O failure on an input, output, or temporary file
    Io(io::Error),
    /// An internal invariant does not hold; indicates a bug or a corrupt index
    InvariantViolated(String),
    /// The process was interrupted by a signal
    Interrupted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::Parse(msg) => write!(f, "parse error: {}", msg),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::InvariantViolated(msg) => write!(f, "invariant violated: {}", msg),
            Error::Interrupted => write!(f, "interrupted by signal"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
