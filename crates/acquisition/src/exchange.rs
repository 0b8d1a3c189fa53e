//! Frame Exchange
//!
//! Two frame slots alternate between the acquirer and the recorder. The
//! acquirer fills its slot and publishes it; it gets the other slot back
//! only after the recorder has released it. A slot is therefore never
//! written while the recorder still reads it, whatever the relative speed
//! of the two threads.

use crate::Frame;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

struct Slots {
    /// Published frame waiting for the recorder
    ready: Option<Frame>,
    /// Slot released by the recorder, next write target
    free: Option<Frame>,
    /// Set on shutdown
    closed: bool,
}

/// One-frame mailbox with a release acknowledgement
pub struct FrameExchange {
    slots: Mutex<Slots>,
    /// Signalled when a frame is published
    ready: Condvar,
    /// Signalled when a slot is released
    released: Condvar,
}

impl FrameExchange {
    /// Create the exchange and the acquirer's first write slot
    pub fn new(frame_size: usize) -> (Self, Frame) {
        let exchange = Self {
            slots: Mutex::new(Slots {
                ready: None,
                free: Some(Frame::zeroed(frame_size)),
                closed: false,
            }),
            ready: Condvar::new(),
            released: Condvar::new(),
        };
        (exchange, Frame::zeroed(frame_size))
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand a filled slot to the recorder and get the next write slot
    ///
    /// Blocks until the recorder has released the previously published
    /// slot. Returns `None` once the exchange is closed.
    pub fn publish(&self, frame: Frame) -> Option<Frame> {
        let mut slots = self.lock();
        while slots.free.is_none() && !slots.closed {
            slots = self
                .released
                .wait(slots)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if slots.closed {
            return None;
        }

        let next = slots.free.take();
        slots.ready = Some(frame);
        self.ready.notify_one();
        next
    }

    /// Wait for the next published frame
    ///
    /// Returns `None` once the exchange is closed and no frame is pending.
    pub fn take(&self) -> Option<Frame> {
        let mut slots = self.lock();
        while slots.ready.is_none() && !slots.closed {
            slots = self
                .ready
                .wait(slots)
                .unwrap_or_else(PoisonError::into_inner);
        }
        slots.ready.take()
    }

    /// Return a consumed slot to the acquirer
    pub fn release(&self, frame: Frame) {
        let mut slots = self.lock();
        slots.free = Some(frame);
        self.released.notify_one();
    }

    /// Wake both sides and make every further wait return immediately
    pub fn close(&self) {
        let mut slots = self.lock();
        slots.closed = true;
        self.ready.notify_all();
        self.released.notify_all();
    }
}
