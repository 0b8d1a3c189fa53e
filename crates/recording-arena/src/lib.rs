//! Recording Arena
//!
//! A single pre-allocated byte region holding recorded frames back to back.
//! The write cursor wraps to the start when the next frame would not fit,
//! so the arena behaves as a bounded circular log.

mod arena;

pub use arena::{Arena, ArenaStats, DEFAULT_CAPACITY};

use thiserror::Error;

/// Arena errors
#[derive(Debug, Error)]
pub enum ArenaError {
    /// Frame size or capacity cannot hold a single frame
    #[error("Invalid arena geometry: capacity {capacity} bytes, frame size {frame_size} bytes")]
    InvalidGeometry { capacity: usize, frame_size: usize },

    /// Backing memory could not be reserved
    #[error("Failed to allocate {0} bytes for the recording arena")]
    Allocation(usize),

    /// Written slice does not match the frame size
    #[error("Frame length mismatch: expected {expected} bytes, got {actual}")]
    FrameLength { expected: usize, actual: usize },
}
