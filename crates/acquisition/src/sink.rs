//! Live Data Sinks
//!
//! Every acquired frame is forwarded, recording or not. Forwarding is best
//! effort: a sink that cannot keep up drops frames and counts them, it never
//! pushes back on the pipeline.

use crate::Frame;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Destination of forwarded frames
pub trait DataSink: Send + 'static {
    /// Forward one frame
    fn forward(&mut self, frame: &Frame);
}

impl DataSink for Box<dyn DataSink> {
    fn forward(&mut self, frame: &Frame) {
        (**self).forward(frame);
    }
}

/// Sends each frame as one UDP datagram
pub struct UdpSink {
    /// Unconnected local socket
    socket: UdpSocket,
    /// Listener address
    target: SocketAddr,
    /// Datagrams that failed to send
    errors: u64,
}

impl UdpSink {
    /// Bind an ephemeral local socket forwarding to `target`
    pub fn bind(target: SocketAddr) -> std::io::Result<Self> {
        let local = if target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local)?;
        info!("Forwarding frames to {}", target);
        Ok(Self {
            socket,
            target,
            errors: 0,
        })
    }

    /// Change the listener address
    pub fn set_target(&mut self, target: SocketAddr) {
        info!("Forwarding frames to {}", target);
        self.target = target;
    }

    /// Listener address
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Datagrams that failed to send
    pub fn errors(&self) -> u64 {
        self.errors
    }
}

impl DataSink for UdpSink {
    fn forward(&mut self, frame: &Frame) {
        if let Err(e) = self.socket.send_to(frame.as_bytes(), self.target) {
            self.errors += 1;
            // Log the first failure and then every thousandth
            if self.errors % 1000 == 1 {
                warn!(
                    "Failed to forward frame {} to {}: {} ({} failures)",
                    frame.sequence(),
                    self.target,
                    e,
                    self.errors
                );
            }
        }
    }
}

/// Discards every frame, used when no listener is configured
#[derive(Debug, Default)]
pub struct NullSink {
    discarded: u64,
}

impl NullSink {
    /// Frames discarded so far
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl DataSink for NullSink {
    fn forward(&mut self, _frame: &Frame) {
        self.discarded += 1;
    }
}

/// Forwards frames into a bounded Tokio channel
pub struct ChannelSink {
    tx: mpsc::Sender<Frame>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel
    pub fn new(depth: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(depth);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Shared counter of frames dropped because the channel was full
    pub fn dropped(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

impl DataSink for ChannelSink {
    fn forward(&mut self, frame: &Frame) {
        match self.tx.try_send(frame.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Frame receiver dropped, discarding frame {}", frame.sequence());
            }
        }
    }
}
