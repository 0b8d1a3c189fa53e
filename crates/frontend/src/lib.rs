//! Acquisition Front End
//!
//! Control surface used by the operator dispatcher: session transitions,
//! tagging, saving and controller configuration on top of the acquisition
//! pipeline and the command channel.

mod config;
mod control;
mod logging;

pub use config::{CommandConfig, FrontendConfig, SinkConfig, ENV_PREFIX};
pub use control::Frontend;
pub use logging::{init_logging, init_logging_with};

pub use acquisition::{
    ChannelSink, DataSink, Frame, LinkTransport, NullSink, ScriptedLink, SessionState, UdpSink,
};
pub use controller_protocol::{CommandChannel, Parameter};
pub use recording_arena::ArenaStats;
pub use session_store::{SavedRecording, TagEntry};

use thiserror::Error;

/// Front end errors
#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Protocol(#[from] controller_protocol::ProtocolError),

    #[error(transparent)]
    Arena(#[from] recording_arena::ArenaError),

    #[error(transparent)]
    Storage(#[from] session_store::StorageError),

    #[error(transparent)]
    Pipeline(#[from] acquisition::PipelineError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Failed to open data sink: {0}")]
    Sink(#[source] std::io::Error),

    #[error("Failed to install log subscriber: {0}")]
    Logging(String),
}

/// Outcome of an operator request
///
/// Requests whose preconditions do not hold are not errors; they leave the
/// session untouched and carry a short reason for the operator.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum Transition<T = ()> {
    /// The request took effect
    Applied(T),
    /// Nothing to do
    Unchanged(&'static str),
}

impl<T> Transition<T> {
    /// Whether the request took effect
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }

    /// Value of an applied request
    pub fn applied(self) -> Option<T> {
        match self {
            Transition::Applied(value) => Some(value),
            Transition::Unchanged(_) => None,
        }
    }
}
