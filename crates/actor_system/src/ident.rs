//! Recycling integer identifier allocators.
//!
//! Freed identifiers are reused FIFO before fresh ones are minted, keeping
//! the live ID range dense. [`IdentAllocator`] is single-owner;
//! [`SyncIdentAllocator`] wraps it for cross-thread use.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Non-thread-safe recycling allocator.
#[derive(Debug, Default)]
pub struct IdentAllocator {
    recycled: VecDeque<i64>,
    next: i64,
    usage: i64,
}

impl IdentAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a recycled identifier if one exists, otherwise a fresh one.
    /// Identifiers start at 1; 0 and negatives stay free for sentinels.
    pub fn allocate(&mut self) -> i64 {
        self.usage += 1;
        if let Some(id) = self.recycled.pop_front() {
            return id;
        }
        self.next += 1;
        self.next
    }

    /// Return an identifier for future reuse.
    pub fn recycle(&mut self, id: i64) {
        self.recycled.push_back(id);
        self.usage = (self.usage - 1).max(0);
    }

    /// Count of identifiers currently handed out.
    pub fn usage(&self) -> i64 {
        self.usage
    }
}

/// Thread-safe variant; all operations take a short internal lock.
#[derive(Debug, Default)]
pub struct SyncIdentAllocator {
    inner: Mutex<IdentAllocator>,
}

impl SyncIdentAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> i64 {
        self.inner.lock().allocate()
    }

    pub fn recycle(&self, id: i64) {
        self.inner.lock().recycle(id)
    }

    pub fn usage(&self) -> i64 {
        self.inner.lock().usage()
    }
}
