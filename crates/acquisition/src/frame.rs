//! Acquisition frame

/// One fixed-size frame read from the hardware link
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw frame bytes
    data: Box<[u8]>,
    /// Acquisition cycle that produced the frame
    sequence: u64,
}

impl Frame {
    /// Create a zero-filled frame of `size` bytes
    pub fn zeroed(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
            sequence: 0,
        }
    }

    /// Create a frame from raw bytes
    pub fn from_bytes(data: impl Into<Box<[u8]>>, sequence: u64) -> Self {
        Self {
            data: data.into(),
            sequence,
        }
    }

    /// Frame bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable frame bytes, target of the hardware transfer
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Acquisition cycle of this frame
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Frame size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame holds no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let head = &self.data[..self.data.len().min(8)];
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("len", &self.data.len())
            .field("head", &head)
            .finish()
    }
}
