//! Protocol Error Types

use thiserror::Error;

/// Errors that can occur while commanding the controller
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serial port could not be opened or configured
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Writing the command failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No matching acknowledgement within the window
    #[error("Command '{id}' not acknowledged within {timeout_ms}ms")]
    Timeout { id: char, timeout_ms: u64 },

    /// The acknowledgement stream ended
    #[error("Controller link closed")]
    Disconnected,

    /// Channel outside the supported range
    #[error("Channel {0} not supported (expected 1 or 2)")]
    InvalidChannel(u8),

    /// Value cannot be encoded as a parameter
    #[error("Invalid value {value} for {parameter}: {reason}")]
    InvalidValue {
        parameter: &'static str,
        value: f64,
        reason: &'static str,
    },
}

impl From<tokio_serial::Error> for ProtocolError {
    fn from(err: tokio_serial::Error) -> Self {
        ProtocolError::Serial(err.to_string())
    }
}
