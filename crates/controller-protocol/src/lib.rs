//! Controller Command Protocol
//!
//! Frames parameter-set commands for the acquisition controller and waits
//! for the controller to acknowledge them. One command is outstanding at a
//! time; a command that is not acknowledged within the timeout window fails
//! and is never retried here.

mod channel;
mod command;
mod error;

pub use channel::{Acknowledgement, CommandChannel, DEFAULT_ACK_TIMEOUT_MS};
pub use command::{Command, CommandId, Parameter, TimingLock, CONTROLLER_CLOCK_MHZ};
pub use error::ProtocolError;

/// Default baud rate of the controller UART
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
