//! Front end configuration

use crate::FrontendError;
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Prefix of environment overrides, e.g. `DAQ_FRAME_SIZE` or
/// `DAQ_COMMAND__DEVICE`
pub const ENV_PREFIX: &str = "DAQ";

/// Front end configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    /// Folder receiving saved recordings
    pub data_folder: PathBuf,

    /// Frame size in bytes
    pub frame_size: usize,

    /// Recording arena capacity in bytes
    pub arena_capacity: usize,

    /// Recording name used when none is given
    pub default_recording_name: String,

    /// Controller sampling period (microseconds)
    pub timer_period_us: f64,

    pub command: CommandConfig,

    pub sink: SinkConfig,
}

/// Controller command link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Serial device
    pub device: String,
    pub baud_rate: u32,
    /// Acknowledgement window (milliseconds)
    pub ack_timeout_ms: u64,
}

/// Live data forwarding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// UDP listener; frames are discarded when unset
    pub address: Option<SocketAddr>,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            data_folder: PathBuf::from("/home/pi/data"),
            frame_size: 32,
            arena_capacity: recording_arena::DEFAULT_CAPACITY,
            default_recording_name: "recording".to_string(),
            timer_period_us: 44.0,
            command: CommandConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            device: "/dev/serial0".to_string(),
            baud_rate: controller_protocol::DEFAULT_BAUD_RATE,
            ack_timeout_ms: controller_protocol::DEFAULT_ACK_TIMEOUT_MS,
        }
    }
}

impl FrontendConfig {
    /// Load defaults, then the optional TOML file, then `DAQ_` variables
    pub fn load(path: Option<&Path>) -> Result<Self, FrontendError> {
        Self::load_with(path, Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn load_with(path: Option<&Path>, environment: Environment) -> Result<Self, FrontendError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), FrontendError> {
        if self.frame_size == 0 {
            return Err(FrontendError::InvalidConfig(
                "frame_size must be positive".to_string(),
            ));
        }
        if self.arena_capacity < self.frame_size {
            return Err(FrontendError::InvalidConfig(format!(
                "arena_capacity {} cannot hold a {} byte frame",
                self.arena_capacity, self.frame_size
            )));
        }
        if self.command.ack_timeout_ms == 0 {
            return Err(FrontendError::InvalidConfig(
                "command.ack_timeout_ms must be positive".to_string(),
            ));
        }
        if !(self.timer_period_us.is_finite() && self.timer_period_us > 0.0) {
            return Err(FrontendError::InvalidConfig(format!(
                "timer_period_us must be positive, got {}",
                self.timer_period_us
            )));
        }
        Ok(())
    }

    /// Controller sampling period
    pub fn timer_period(&self) -> Duration {
        Duration::from_secs_f64(self.timer_period_us / 1e6)
    }

    /// Acknowledgement window
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.command.ack_timeout_ms)
    }
}
