//! Disconnected-player cache.
//!
//! Holds the actor state of recently disconnected players so a reconnect
//! inside the keep-alive window skips the storage reload. Entries are
//! bounded both by age and by total count; trimming is oldest-first by
//! insertion time, not strict LRU.

use actor_system::PlayerId;
use service_system::PlayerInstance;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

struct CacheEntry {
    instance: PlayerInstance,
    cached_at: Instant,
}

/// Insertion-time-bounded player state cache.
pub struct PlayerCache {
    entries: HashMap<PlayerId, CacheEntry>,
    keep_alive: Duration,
    max_size: usize,
}

impl PlayerCache {
    pub fn new(keep_alive: Duration, max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            keep_alive,
            max_size,
        }
    }

    /// Park a player's actor state at the current instant.
    ///
    /// A second disconnect for the same identity replaces the stale entry.
    pub fn insert(&mut self, pid: PlayerId, instance: PlayerInstance) {
        self.entries.insert(
            pid,
            CacheEntry {
                instance,
                cached_at: Instant::now(),
            },
        );
        debug!(player = pid, cached = self.entries.len(), "player cached");
    }

    /// Take a player's state back out, if it is still within its window.
    ///
    /// An entry past the keep-alive window is discarded on the spot and
    /// `None` is returned, forcing a fresh load.
    pub fn reclaim(&mut self, pid: PlayerId) -> Option<PlayerInstance> {
        let entry = self.entries.remove(&pid)?;
        if entry.cached_at.elapsed() > self.keep_alive {
            debug!(player = pid, "cached state expired");
            return None;
        }
        debug!(player = pid, "player reclaimed from cache");
        Some(entry.instance)
    }

    /// Periodic sweep: drop aged entries, then trim oldest-first down to
    /// the size bound.
    pub fn collect(&mut self) {
        let keep_alive = self.keep_alive;
        self.entries
            .retain(|_, entry| entry.cached_at.elapsed() <= keep_alive);

        if self.entries.len() > self.max_size {
            let mut by_age: Vec<(PlayerId, Instant)> = self
                .entries
                .iter()
                .map(|(pid, entry)| (*pid, entry.cached_at))
                .collect();
            by_age.sort_by_key(|(_, cached_at)| *cached_at);

            let excess = self.entries.len() - self.max_size;
            for (pid, _) in by_age.into_iter().take(excess) {
                self.entries.remove(&pid);
                debug!(player = pid, "player evicted by cache bound");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, pid: PlayerId) -> bool {
        self.entries.contains_key(&pid)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
