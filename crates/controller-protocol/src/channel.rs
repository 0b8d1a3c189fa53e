//! Command Channel
//!
//! Sends one command at a time over a byte stream and waits for the
//! controller to echo its identifier back. Incoming bytes are read by a
//! background task and delivered to the channel as acknowledgements.

use crate::command::Command;
use crate::error::ProtocolError;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, trace, warn};

/// Default acknowledgement window
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 300;

/// Acknowledgements buffered between the reader task and the channel
const ACK_QUEUE_DEPTH: usize = 16;

/// Acknowledgement received from the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    /// Identifier byte echoed by the controller
    pub id: u8,
}

/// Command channel to the acquisition controller
pub struct CommandChannel {
    /// Write half of the controller link
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    /// Acknowledgements delivered by the reader task
    acks: mpsc::Receiver<Acknowledgement>,
    /// Acknowledgement window
    timeout: Duration,
    /// Reader task
    reader: JoinHandle<()>,
}

impl CommandChannel {
    /// Create a channel over any byte stream
    ///
    /// Must be called from within a Tokio runtime: the read half is moved
    /// into a spawned task.
    pub fn new<S>(stream: S, timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(ACK_QUEUE_DEPTH);
        let reader = tokio::spawn(read_acknowledgements(read_half, tx));

        Self {
            writer: Box::new(write_half),
            acks: rx,
            timeout,
            reader,
        }
    }

    /// Open the controller UART (8N1) and create a channel over it
    pub fn open_serial(
        device: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Self, ProtocolError> {
        info!("Opening controller link on {} at {} baud", device, baud_rate);

        let port = tokio_serial::new(device, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .open_native_async()?;

        Ok(Self::new(port, timeout))
    }

    /// Acknowledgement window
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the acknowledgement window
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a command and wait for its acknowledgement
    ///
    /// Acknowledgements left over from earlier commands are discarded before
    /// sending. Acknowledgements for other identifiers are ignored while
    /// waiting.
    pub async fn send(&mut self, command: &Command) -> Result<Acknowledgement, ProtocolError> {
        let id = command.id();

        while let Ok(stale) = self.acks.try_recv() {
            debug!("Discarding stale acknowledgement '{}'", stale.id as char);
        }

        self.writer.write_all(&command.encode()).await?;
        self.writer.flush().await?;
        debug!(
            "Sent command '{}' with parameters {:?}",
            id.as_char(),
            command.params()
        );

        let timeout = self.timeout;
        let acks = &mut self.acks;
        let wait = async {
            loop {
                match acks.recv().await {
                    Some(ack) if ack.id == id.as_byte() => return Ok(ack),
                    Some(other) => {
                        debug!(
                            "Ignoring acknowledgement '{}' while waiting for '{}'",
                            other.id as char,
                            id.as_char()
                        );
                    }
                    None => return Err(ProtocolError::Disconnected),
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Command '{}' not acknowledged within {}ms",
                    id.as_char(),
                    timeout.as_millis()
                );
                Err(ProtocolError::Timeout {
                    id: id.as_char(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Turn every chunk read from the controller into an acknowledgement
async fn read_acknowledgements<R>(mut reader: R, tx: mpsc::Sender<Acknowledgement>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 256];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("Controller link closed");
                break;
            }
            Ok(n) => {
                trace!("Received {} bytes from controller", n);
                if tx.send(Acknowledgement { id: buf[0] }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Error reading from controller: {}", e);
                break;
            }
        }
    }
}
