//! Bounded buffer for client frames that arrive while no upstream link is open.
//!
//! Overflow evicts the oldest frame. Stale audio is worthless to a live
//! voice session, so keeping the newest frames gives the best chance of a
//! coherent resume after reconnection.

use std::collections::VecDeque;

/// Default number of frames held while upstream is unavailable.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

#[derive(Debug)]
pub struct OutboundQueue<T> {
    frames: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T> OutboundQueue<T> {
    /// A zero capacity is bumped to one so `enqueue` always keeps the newest frame.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Append a frame, evicting the head first when full.
    ///
    /// Returns the evicted frame, if any.
    pub fn enqueue(&mut self, frame: T) -> Option<T> {
        let evicted = if self.frames.len() >= self.capacity {
            self.evicted += 1;
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    /// Drain frames in FIFO order until `sink` refuses one.
    ///
    /// The sink hands a refused frame back; it goes back to the head with
    /// everything behind it still queued. Returns the number of frames
    /// delivered.
    pub fn flush<F>(&mut self, mut sink: F) -> usize
    where
        F: FnMut(T) -> Result<(), T>,
    {
        let mut delivered = 0;
        while let Some(frame) = self.frames.pop_front() {
            if let Err(refused) = sink(frame) {
                self.frames.push_front(refused);
                break;
            }
            delivered += 1;
        }
        delivered
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames dropped to overflow since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

impl<T> Default for OutboundQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
