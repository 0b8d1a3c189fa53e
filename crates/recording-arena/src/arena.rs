//! Circular Arena Implementation

use crate::ArenaError;
use serde::Serialize;
use std::alloc::{self, Layout};
use std::ptr;
use tracing::{debug, info};

/// Default arena capacity (1 GiB)
pub const DEFAULT_CAPACITY: usize = 1024 * 1024 * 1024;

/// Snapshot of the arena cursor and counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArenaStats {
    /// Arena capacity in bytes
    pub capacity: usize,
    /// Frame size in bytes
    pub frame_size: usize,
    /// Current write cursor
    pub offset: usize,
    /// Frames written since the last reset
    pub frames_written: u64,
    /// Times the cursor wrapped back to zero since the last reset
    pub wraps: u64,
}

/// Pre-allocated circular byte arena for fixed-size frames
///
/// The cursor always satisfies `offset <= capacity - frame_size`. After a
/// frame is copied at `offset`, the cursor advances by one frame, or goes
/// back to zero when another frame would not fit behind it.
pub struct Arena {
    /// Pre-allocated storage
    storage: Box<[u8]>,
    /// Size of every frame in bytes
    frame_size: usize,
    /// Write cursor
    offset: usize,
    /// Frames written since the last reset
    frames_written: u64,
    /// Cursor wraps since the last reset
    wraps: u64,
}

impl Arena {
    /// Allocate an arena of `capacity` bytes for frames of `frame_size` bytes
    ///
    /// The memory is requested zeroed from the allocator, so large arenas
    /// come from fresh pages that only become resident once frames are
    /// written. A refused allocation is reported instead of aborting the
    /// process.
    pub fn allocate(capacity: usize, frame_size: usize) -> Result<Self, ArenaError> {
        if frame_size == 0 || capacity < frame_size {
            return Err(ArenaError::InvalidGeometry {
                capacity,
                frame_size,
            });
        }

        let storage = allocate_zeroed(capacity).ok_or(ArenaError::Allocation(capacity))?;

        info!(
            "Recording arena allocated: {} bytes, {} byte frames",
            capacity, frame_size
        );

        Ok(Self {
            storage,
            frame_size,
            offset: 0,
            frames_written: 0,
            wraps: 0,
        })
    }

    /// Copy one frame at the cursor and advance it
    pub fn write(&mut self, frame: &[u8]) -> Result<(), ArenaError> {
        if frame.len() != self.frame_size {
            return Err(ArenaError::FrameLength {
                expected: self.frame_size,
                actual: frame.len(),
            });
        }

        if self.offset + self.frame_size > self.storage.len() {
            self.offset = 0;
        }

        self.storage[self.offset..self.offset + self.frame_size].copy_from_slice(frame);
        self.frames_written += 1;

        let next = self.offset + self.frame_size;
        if next + self.frame_size > self.storage.len() {
            debug!("Arena cursor wrapped after {} frames", self.frames_written);
            self.offset = 0;
            self.wraps += 1;
        } else {
            self.offset = next;
        }

        Ok(())
    }

    /// Bytes between the start of the arena and the cursor
    pub fn recorded(&self) -> &[u8] {
        &self.storage[..self.offset]
    }

    /// Current write cursor
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Arena capacity in bytes
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Frame size in bytes
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Whether nothing has been written since the last reset
    pub fn is_empty(&self) -> bool {
        self.frames_written == 0
    }

    /// Move the cursor back to zero and clear the counters
    ///
    /// The bytes themselves are left in place and get overwritten by the
    /// next frames.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.frames_written = 0;
        self.wraps = 0;
    }

    /// Get cursor and counters
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            capacity: self.storage.len(),
            frame_size: self.frame_size,
            offset: self.offset,
            frames_written: self.frames_written,
            wraps: self.wraps,
        }
    }
}

/// Zero-filled boxed slice without touching its pages, `None` if refused
fn allocate_zeroed(len: usize) -> Option<Box<[u8]>> {
    if len == 0 {
        return Some(Box::default());
    }
    let layout = Layout::array::<u8>(len).ok()?;
    // SAFETY: layout has a non-zero size.
    let ptr = unsafe { alloc::alloc_zeroed(layout) };
    if ptr.is_null() {
        return None;
    }
    // SAFETY: ptr was allocated by the global allocator with the layout of
    // a `[u8]` of `len` elements, and zeroed bytes are valid `u8`s.
    Some(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, len)) })
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena").field("stats", &self.stats()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame(fill: u8) -> [u8; 32] {
        [fill; 32]
    }

    #[test]
    fn test_rejects_invalid_geometry() {
        assert!(matches!(
            Arena::allocate(16, 32),
            Err(ArenaError::InvalidGeometry { .. })
        ));
        assert!(matches!(
            Arena::allocate(128, 0),
            Err(ArenaError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_fresh_arena_is_zeroed() {
        let arena = Arena::allocate(4096, 32).unwrap();
        assert_eq!(arena.capacity(), 4096);
        assert!(arena.storage.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_refused_allocation_is_error() {
        // Larger than any layout the allocator accepts
        let capacity = usize::MAX - 7;
        assert!(matches!(
            Arena::allocate(capacity, 32),
            Err(ArenaError::Allocation(c)) if c == capacity
        ));
    }

    #[test]
    fn test_rejects_wrong_frame_length() {
        let mut arena = Arena::allocate(128, 32).unwrap();
        let err = arena.write(&[0u8; 31]).unwrap_err();
        assert!(matches!(
            err,
            ArenaError::FrameLength {
                expected: 32,
                actual: 31
            }
        ));
        assert_eq!(arena.offset(), 0);
    }

    #[test]
    fn test_wrap_sequence() {
        // 128 byte arena, 32 byte frames: cursor goes 32, 64, 96, 0, 32
        let mut arena = Arena::allocate(128, 32).unwrap();
        let mut offsets = Vec::new();
        for i in 0..5u8 {
            arena.write(&frame(i + 1)).unwrap();
            offsets.push(arena.offset());
        }
        assert_eq!(offsets, vec![32, 64, 96, 0, 32]);

        // Only the fifth frame lies before the cursor
        assert_eq!(arena.recorded(), &frame(5)[..]);
        assert_eq!(arena.stats().wraps, 1);
        assert_eq!(arena.stats().frames_written, 5);
    }

    #[test]
    fn test_frames_are_contiguous_in_order() {
        let mut arena = Arena::allocate(256, 32).unwrap();
        for i in 0..3u8 {
            arena.write(&frame(i)).unwrap();
        }
        let recorded = arena.recorded();
        assert_eq!(recorded.len(), 96);
        for (i, chunk) in recorded.chunks(32).enumerate() {
            assert!(chunk.iter().all(|b| *b == i as u8));
        }
    }

    #[test]
    fn test_capacity_not_multiple_of_frame() {
        // 100 byte arena only fits three 32 byte frames
        let mut arena = Arena::allocate(100, 32).unwrap();
        let mut offsets = Vec::new();
        for i in 0..4u8 {
            arena.write(&frame(i)).unwrap();
            offsets.push(arena.offset());
        }
        assert_eq!(offsets, vec![32, 64, 0, 32]);
    }

    #[test]
    fn test_reset() {
        let mut arena = Arena::allocate(128, 32).unwrap();
        arena.write(&frame(1)).unwrap();
        arena.write(&frame(2)).unwrap();
        assert!(!arena.is_empty());

        arena.reset();
        assert_eq!(arena.offset(), 0);
        assert!(arena.recorded().is_empty());
        assert!(arena.is_empty());
    }

    proptest! {
        #[test]
        fn prop_cursor_stays_in_bounds(
            frames_per_arena in 1usize..16,
            slack in 0usize..32,
            writes in 0usize..200,
        ) {
            let frame_size = 32;
            let capacity = frames_per_arena * frame_size + slack;
            let mut arena = Arena::allocate(capacity, frame_size).unwrap();
            for i in 0..writes {
                arena.write(&frame(i as u8)).unwrap();
                prop_assert!(arena.offset() + frame_size <= capacity);
                prop_assert_eq!(arena.offset() % frame_size, 0);
            }
            prop_assert_eq!(arena.stats().frames_written, writes as u64);
        }

        #[test]
        fn prop_recorded_matches_last_frames(writes in 1usize..40) {
            let mut arena = Arena::allocate(8 * 32, 32).unwrap();
            for i in 0..writes {
                arena.write(&frame(i as u8)).unwrap();
            }
            let recorded = arena.recorded().to_vec();
            let count = recorded.len() / 32;
            // The frames before the cursor are the most recent ones, oldest first
            for (k, chunk) in recorded.chunks(32).enumerate() {
                let expected = (writes - count + k) as u8;
                prop_assert!(chunk.iter().all(|b| *b == expected));
            }
        }
    }
}
