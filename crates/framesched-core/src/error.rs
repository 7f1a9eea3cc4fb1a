//! Error types for framesched-core
//!
//! The scheduler itself has no recoverable failure modes: late frames are
//! reported as [`FrameOutcome::Dropped`](crate::scheduler::FrameOutcome) and
//! misuse fails fast. The errors here cover the ambient surfaces around it:
//! binding execution contexts, loading configuration and installing logging.

use std::path::PathBuf;

use thiserror::Error;

use crate::logging::LogError;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for framesched-core
#[derive(Error, Debug)]
pub enum Error {
    /// Execution context errors
    #[error("Execution context error: {0}")]
    Context(#[from] ContextError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Logging initialization errors
    #[error("Logging error: {0}")]
    Log(#[from] LogError),

    /// Simulation run failures
    #[error("Simulation error: {0}")]
    Simulation(String),
}

/// Errors binding work to an execution context.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// A run loop is already bound to the calling thread.
    #[error("a run loop is already bound to this thread")]
    AlreadyBound,

    /// The calling thread has no run loop to host timers.
    #[error("no run loop is bound to this thread")]
    NoRunLoop,
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
