//! Frame Acquisition Pipeline
//!
//! Two long-lived threads move fixed-size frames from the hardware link to
//! the recorder:
//! - the acquirer waits for the controller's ready edge, transfers a frame
//!   into its slot and hands the slot over
//! - the recorder persists the frame into the arena while recording and
//!   forwards every frame to the live data sink
//!
//! Slots travel through a [`FrameExchange`], so the acquirer never writes a
//! slot the recorder is still reading.

mod exchange;
mod frame;
mod link;
mod pipeline;
mod sink;
mod state;

pub use exchange::FrameExchange;
pub use frame::Frame;
pub use link::{LinkError, LinkTransport, ScriptedFeed, ScriptedLink};
pub use pipeline::{Pipeline, RecordingStore, StoreHandle, BYTES_PER_SAMPLE};
pub use sink::{ChannelSink, DataSink, NullSink, UdpSink};
pub use state::SessionState;

use thiserror::Error;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
