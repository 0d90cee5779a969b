//! Handoff queue between the capture thread and the consumer.
//!
//! The only memory shared between the two sides. The lock is held for a push
//! or a vector swap, never while frames are produced or consumed.

use std::mem;
use std::sync::{Mutex, MutexGuard};

/// Backlog size at which a slow consumer gets logged.
pub const DEFAULT_HIGH_WATER: usize = 64;

pub struct FrameQueue<T> {
    items: Mutex<Vec<T>>,
    high_water: usize,
}

impl<T> FrameQueue<T> {
    pub fn new() -> Self {
        Self::with_high_water(DEFAULT_HIGH_WATER)
    }

    pub fn with_high_water(high_water: usize) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            high_water: high_water.max(1),
        }
    }

    /// Append an item. Never waits on the consumer.
    pub fn push(&self, item: T) {
        let backlog = {
            let mut items = self.lock();
            items.push(item);
            items.len()
        };
        if backlog == self.high_water {
            log::warn!(
                "handoff backlog reached {} items; consumer is falling behind",
                backlog
            );
        }
    }

    /// Take everything queued so far, oldest first, leaving the queue empty.
    pub fn drain_all(&self) -> Vec<T> {
        mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        // A panic while holding this lock cannot leave the vector half-updated.
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for FrameQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
