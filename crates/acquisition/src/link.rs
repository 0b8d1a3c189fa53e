//! Hardware Link Seam
//!
//! The ready/acknowledge handshake and the bulk transfer are performed by a
//! transport outside this crate. Both calls block for as long as the
//! hardware takes; there is no timeout.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Link transport errors
#[derive(Debug, Error)]
pub enum LinkError {
    /// The link will not deliver any more frames
    #[error("Link closed")]
    Closed,

    /// A transfer could not be completed
    #[error("Transfer failed: {0}")]
    Transfer(String),
}

/// Blocking frame source driven by the controller
pub trait LinkTransport: Send + 'static {
    /// Block until the controller signals that a frame is available
    fn await_ready(&mut self) -> Result<(), LinkError>;

    /// Transfer one frame into `buf`, blocking until complete
    fn transfer(&mut self, buf: &mut [u8]) -> Result<(), LinkError>;
}

/// Link that replays frames pushed through a [`ScriptedFeed`]
///
/// Each pushed frame is one ready edge. Once every feed handle is dropped
/// and the queue is drained, `await_ready` reports [`LinkError::Closed`].
pub struct ScriptedLink {
    frames: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Option<Vec<u8>>,
}

/// Sending side of a [`ScriptedLink`]
#[derive(Debug, Clone)]
pub struct ScriptedFeed {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ScriptedLink {
    /// Create an empty link and its feed
    pub fn new() -> (Self, ScriptedFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                frames: rx,
                pending: None,
            },
            ScriptedFeed { tx },
        )
    }

    /// Create a link that replays `frames` once and then closes
    pub fn from_frames(frames: impl IntoIterator<Item = Vec<u8>>) -> Self {
        let (link, feed) = Self::new();
        for frame in frames {
            feed.push(frame);
        }
        link
    }
}

impl ScriptedFeed {
    /// Queue one frame; returns false if the link is gone
    pub fn push(&self, frame: Vec<u8>) -> bool {
        self.tx.send(frame).is_ok()
    }
}

impl LinkTransport for ScriptedLink {
    fn await_ready(&mut self) -> Result<(), LinkError> {
        match self.frames.blocking_recv() {
            Some(frame) => {
                self.pending = Some(frame);
                Ok(())
            }
            None => {
                debug!("Scripted link exhausted");
                Err(LinkError::Closed)
            }
        }
    }

    fn transfer(&mut self, buf: &mut [u8]) -> Result<(), LinkError> {
        let frame = self
            .pending
            .take()
            .ok_or_else(|| LinkError::Transfer("transfer without ready edge".to_string()))?;
        if frame.len() != buf.len() {
            return Err(LinkError::Transfer(format!(
                "scripted frame has {} bytes, slot has {}",
                frame.len(),
                buf.len()
            )));
        }
        buf.copy_from_slice(&frame);
        Ok(())
    }
}
