//! Reusable example pool.
//!
//! Examples allocate 256 namespace slots up front, so recycling them matters
//! on hot paths. The pool is a bounded ring: `acquire` hands out a recycled
//! example (or a fresh one when the ring is empty), and `release` resets the
//! example and returns it to the ring, dropping it when the ring is full.
//!
//! The creator of an example owns it until it is handed back here; the
//! learner stack never owns examples.

use std::collections::VecDeque;

use parking_lot::Mutex;

use cascade_core::Example;

/// A bounded ring of recycled examples.
#[derive(Debug)]
pub struct ExamplePool {
    ring: Mutex<VecDeque<Example>>,
    capacity: usize,
}

impl ExamplePool {
    /// Creates a pool retaining at most `capacity` recycled examples.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Hands out a cleared example.
    pub fn acquire(&self) -> Example {
        self.ring.lock().pop_front().unwrap_or_default()
    }

    /// Returns an example to the pool after the stack has finished with it.
    pub fn release(&self, mut ex: Example) {
        let mut ring = self.ring.lock();
        if ring.len() < self.capacity {
            ex.reset();
            ring.push_back(ex);
        }
    }

    /// Number of examples currently cached.
    pub fn cached(&self) -> usize {
        self.ring.lock().len()
    }
}

impl Default for ExamplePool {
    fn default() -> Self {
        Self::new(256)
    }
}
