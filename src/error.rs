//! Error types
//!
//! Connection faults stay local to a viewer and are only logged; the types
//! here cover what callers of the library can actually observe.

use std::fmt;
use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Socket or stream I/O failure
    Io(io::Error),
    /// HTTP connection failure (malformed request, header timeout, reset)
    Http(hyper::Error),
    /// Invalid configuration
    Config(ConfigError),
    /// Operation did not complete in time
    Timeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Http(e) => write!(f, "HTTP error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Http(e) => Some(e),
            Error::Config(e) => Some(e),
            Error::Timeout => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<hyper::Error> for Error {
    fn from(e: hyper::Error) -> Self {
        Error::Http(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

/// Configuration file errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A key had a value that is not a valid integer
    InvalidNumber { key: String, value: String },
    /// Rotation outside of 0..360
    InvalidRotation(i32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{} must be an integer, got '{}'", key, value)
            }
            ConfigError::InvalidRotation(deg) => {
                write!(f, "Rotation must be within 0..360 degrees, got {}", deg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
