//! Configuration for framesched
//!
//! Loaded from a TOML file with every field optional. Command-line flags are
//! applied on top by the CLI, then the result is validated once.
//!
//! ```toml
//! [logging]
//! level = "debug"
//! format = "json"
//!
//! [simulation]
//! fps = 30
//! frames = 90
//! stall_every = 10
//! stall_ms = 80
//! variant = "core"
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::ConfigError;
use crate::logging::LogConfig;

/// Upper bound on the simulated frame rate.
pub const MAX_FPS: u32 = 1000;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

/// Which scheduler the simulation drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerVariant {
    /// Deadline scheduler behind a cross-thread proxy.
    #[default]
    Core,
    /// Display-on-schedule scheduler behind the same proxy.
    Clockless,
}

impl fmt::Display for SchedulerVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core => write!(f, "core"),
            Self::Clockless => write!(f, "clockless"),
        }
    }
}

impl FromStr for SchedulerVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "core" | "deadline" => Ok(Self::Core),
            "clockless" => Ok(Self::Clockless),
            _ => Err(format!(
                "unknown scheduler variant: {s}. Expected one of: core, clockless"
            )),
        }
    }
}

/// Producer and scheduler settings for `framesched simulate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Frame rate of the producer; frame `n` is due at `start + n / fps`.
    pub fps: u32,

    /// Number of frames to produce.
    pub frames: u64,

    /// How far ahead of its deadline each frame is scheduled.
    pub lead_ms: u64,

    /// Block the display thread after every Nth displayed frame.
    /// 0 disables stalls.
    pub stall_every: u64,

    /// Length of each display stall.
    pub stall_ms: u64,

    /// Scheduler under test.
    pub variant: SchedulerVariant,

    /// Shift applied to the scheduler's clock relative to the producer's.
    pub clock_offset_ms: u64,

    /// Abort the run if it has not finished after this long.
    pub timeout_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            frames: 120,
            lead_ms: 50,
            stall_every: 0,
            stall_ms: 0,
            variant: SchedulerVariant::Core,
            clock_offset_ms: 0,
            timeout_ms: 30_000,
        }
    }
}

impl SimulationConfig {
    /// Time between consecutive frame deadlines.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }

    /// Offset of frame `index`'s deadline from the first frame's.
    #[must_use]
    pub fn deadline_offset(&self, index: u64) -> Duration {
        let nanos = u128::from(index) * 1_000_000_000 / u128::from(self.fps.max(1));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    #[must_use]
    pub fn lead(&self) -> Duration {
        Duration::from_millis(self.lead_ms)
    }

    #[must_use]
    pub fn stall(&self) -> Duration {
        Duration::from_millis(self.stall_ms)
    }

    #[must_use]
    pub fn clock_offset(&self) -> Duration {
        Duration::from_millis(self.clock_offset_ms)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether the display stalls once `displayed` frames have been shown.
    #[must_use]
    pub fn stalls_after(&self, displayed: u64) -> bool {
        self.stall_every > 0
            && self.stall_ms > 0
            && displayed > 0
            && displayed % self.stall_every == 0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(ConfigError::Invalid(format!(
                "fps must be between 1 and {MAX_FPS}, got {}",
                self.fps
            )));
        }
        if self.frames == 0 {
            return Err(ConfigError::Invalid(
                "frames must be at least 1".to_string(),
            ));
        }
        if self.stall_every > 0 && self.stall_ms == 0 {
            return Err(ConfigError::Invalid(
                "stall_every is set but stall_ms is 0".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LogConfig,
    pub simulation: SimulationConfig,
}

impl Config {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        EnvFilter::try_new(&self.logging.level).map_err(|err| {
            ConfigError::Invalid(format!(
                "invalid log level {:?}: {err}",
                self.logging.level
            ))
        })?;
        self.simulation.validate()
    }
}
