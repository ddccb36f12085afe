//! Recycling object pool with reference-counted handles.
//!
//! A [`Recycler`] owns a free queue of pre-constructed elements. Acquiring
//! pops one (expanding the pool in a batch when empty) and hands back a
//! [`RecycleHandle`]; when the last clone of that handle drops, the element
//! is reset and returned to the queue. The pool's control block is detached
//! from the `Recycler` value itself, so handles outliving the pool never
//! dangle: they simply destroy their element instead of recycling it.
//!
//! The free queue is the only structure in the runtime shared between
//! arbitrary threads without agent affinity; it sits behind a
//! shared/exclusive lock, with atomic usage/idle/total counters for
//! lock-free size queries.

mod handle;

pub use handle::RecycleHandle;

use crate::error::ActorError;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Lifecycle contract for pooled elements.
///
/// `on_create` runs once when the pool constructs the element, `initial`
/// every time it is checked out, and `reset` every time it returns to the
/// free queue. `is_unused`/`is_available` expose the lifecycle phase for
/// assertions and diagnostics.
pub trait Recyclable: Send + 'static {
    /// Called once, immediately after construction by the pool.
    fn on_create(&mut self) {}

    /// Called on every acquire, before the element is handed out.
    fn initial(&mut self);

    /// Called on every release, before the element rejoins the free queue.
    fn reset(&mut self);

    /// True between acquire and first assignment of real content.
    fn is_unused(&self) -> bool;

    /// False once the element has been recycled.
    fn is_available(&self) -> bool;
}

/// Pool tuning parameters. Configuration constants, not per-call knobs.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Batch growth factor applied to current usage when the queue is empty.
    pub expand_rate: f32,
    /// Shrink only runs while `usage < ceil(total * shrink_threshold)`.
    pub shrink_threshold: f32,
    /// Fraction of total capacity released by one shrink pass.
    pub shrink_rate: f32,
    /// Capacity never drops below this floor.
    pub min_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            expand_rate: 1.0,
            shrink_threshold: 0.3,
            shrink_rate: 0.5,
            min_capacity: 64,
        }
    }
}

/// Shared control block. Handles keep a `Weak` to this, never to `Recycler`.
pub(crate) struct PoolCore<T: Recyclable> {
    free: RwLock<VecDeque<Box<T>>>,
    usage: AtomicUsize,
    idle: AtomicUsize,
    total: AtomicUsize,
    initialized: AtomicBool,
    config: PoolConfig,
}

impl<T: Recyclable> PoolCore<T> {
    /// Return a checked-out element to the free queue.
    pub(crate) fn release(&self, mut elem: Box<T>) {
        elem.reset();

        let mut free = self.free.write();
        free.push_back(elem);
        self.usage.fetch_sub(1, Ordering::AcqRel);
        self.idle.fetch_add(1, Ordering::AcqRel);
    }
}

/// A recycling pool of `T`.
///
/// Cloning shares the same underlying pool. `acquire`/release are safe from
/// any thread.
pub struct Recycler<T: Recyclable + Default> {
    core: Arc<PoolCore<T>>,
}

impl<T: Recyclable + Default> Clone for Recycler<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Recyclable + Default> Default for Recycler<T> {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl<T: Recyclable + Default> Recycler<T> {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            core: Arc::new(PoolCore {
                free: RwLock::new(VecDeque::new()),
                usage: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                total: AtomicUsize::new(0),
                initialized: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Pre-populate the free queue with `capacity` fresh elements.
    ///
    /// Fails with [`ActorError::AlreadyInitialized`] on a second call.
    pub fn initial(&self, capacity: usize) -> Result<(), ActorError> {
        if self.core.initialized.swap(true, Ordering::AcqRel) {
            return Err(ActorError::AlreadyInitialized);
        }

        let mut free = self.core.free.write();
        for _ in 0..capacity {
            free.push_back(self.construct());
        }
        self.core.idle.fetch_add(capacity, Ordering::AcqRel);
        self.core.total.fetch_add(capacity, Ordering::AcqRel);
        Ok(())
    }

    /// Check out one element, expanding the pool if the queue is empty.
    ///
    /// The returned handle's element has had `initial()` invoked; cloning
    /// the handle shares it, and dropping the last clone recycles it.
    pub fn acquire(&self) -> Result<RecycleHandle<T>, ActorError> {
        if !self.core.initialized.load(Ordering::Acquire) {
            return Err(ActorError::NotInitialized);
        }

        let popped = {
            let mut free = self.core.free.write();
            let elem = free.pop_front();
            if elem.is_some() {
                self.core.idle.fetch_sub(1, Ordering::AcqRel);
            }
            elem
        };

        let mut elem = match popped {
            Some(elem) => elem,
            None => self.expand(),
        };

        self.core.usage.fetch_add(1, Ordering::AcqRel);
        elem.initial();
        Ok(RecycleHandle::new(elem, Arc::downgrade(&self.core)))
    }

    /// Construct a batch of `ceil(usage * expand_rate)` (at least one) fresh
    /// elements, keep one and queue the rest.
    fn expand(&self) -> Box<T> {
        let usage = self.core.usage.load(Ordering::Acquire);
        let batch = ((usage as f32 * self.core.config.expand_rate).ceil() as usize).max(1);

        let mut fresh: Vec<Box<T>> = (0..batch).map(|_| self.construct()).collect();
        let kept = fresh
            .pop()
            .unwrap_or_else(|| self.construct());

        let extra = fresh.len();
        {
            let mut free = self.core.free.write();
            free.extend(fresh);
        }
        self.core.idle.fetch_add(extra, Ordering::AcqRel);
        self.core.total.fetch_add(batch, Ordering::AcqRel);
        kept
    }

    fn construct(&self) -> Box<T> {
        let mut elem = Box::new(T::default());
        elem.on_create();
        elem
    }

    /// Release idle elements while usage sits below the shrink threshold.
    ///
    /// Caller-invoked (typically from a periodic chore); capacity never
    /// drops below the configured minimum.
    pub fn shrink(&self) {
        let total = self.core.total.load(Ordering::Acquire);
        let usage = self.core.usage.load(Ordering::Acquire);

        let threshold = (total as f32 * self.core.config.shrink_threshold).ceil() as usize;
        if usage >= threshold {
            return;
        }

        let goal = (total as f32 * self.core.config.shrink_rate).floor() as usize;
        let floor = self.core.config.min_capacity;

        let mut free = self.core.free.write();
        let mut dropped = 0usize;
        while dropped < goal {
            if self.core.total.load(Ordering::Acquire) <= floor {
                break;
            }
            if free.pop_front().is_none() {
                break;
            }
            self.core.idle.fetch_sub(1, Ordering::AcqRel);
            self.core.total.fetch_sub(1, Ordering::AcqRel);
            dropped += 1;
        }
    }

    /// Number of elements currently checked out.
    pub fn usage(&self) -> usize {
        self.core.usage.load(Ordering::Acquire)
    }

    /// Number of elements waiting in the free queue.
    pub fn idle(&self) -> usize {
        self.core.idle.load(Ordering::Acquire)
    }

    /// Total elements this pool has alive (checked out + idle).
    pub fn capacity(&self) -> usize {
        self.core.total.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Probe {
        created: bool,
        live: bool,
        initial_calls: u32,
        reset_calls: u32,
    }

    impl Recyclable for Probe {
        fn on_create(&mut self) {
            self.created = true;
        }

        fn initial(&mut self) {
            assert_eq!(
                self.initial_calls, self.reset_calls,
                "initial() twice without an intervening reset()"
            );
            self.initial_calls += 1;
            self.live = true;
        }

        fn reset(&mut self) {
            self.reset_calls += 1;
            self.live = false;
        }

        fn is_unused(&self) -> bool {
            !self.live
        }

        fn is_available(&self) -> bool {
            self.live
        }
    }

    fn small_pool(min_capacity: usize) -> Recycler<Probe> {
        Recycler::new(PoolConfig {
            min_capacity,
            ..PoolConfig::default()
        })
    }

    #[test]
    fn initial_twice_fails() {
        let pool = small_pool(4);
        pool.initial(4).expect("first initial");
        assert!(matches!(
            pool.initial(4),
            Err(ActorError::AlreadyInitialized)
        ));
    }

    #[test]
    fn acquire_before_initial_fails() {
        let pool = small_pool(4);
        assert!(matches!(pool.acquire(), Err(ActorError::NotInitialized)));
    }

    #[test]
    fn usage_plus_idle_equals_total() {
        let pool = small_pool(4);
        pool.initial(4).expect("initial");

        let mut held = Vec::new();
        for _ in 0..10 {
            held.push(pool.acquire().expect("acquire"));
            assert_eq!(pool.usage() + pool.idle(), pool.capacity());
        }
        held.clear();
        assert_eq!(pool.usage(), 0);
        assert_eq!(pool.usage() + pool.idle(), pool.capacity());
    }

    #[test]
    fn empty_queue_expands_by_usage_ratio() {
        let pool = small_pool(1);
        pool.initial(1).expect("initial");

        let a = pool.acquire().expect("first");
        // Queue now empty; next acquire expands by ceil(usage * 1.0) = 1.
        let b = pool.acquire().expect("second");
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.usage(), 2);
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn element_is_live_while_handle_held() {
        let pool = small_pool(2);
        pool.initial(2).expect("initial");

        let handle = pool.acquire().expect("acquire");
        assert!(handle.is_available());
        assert!(handle.created);
    }

    #[test]
    fn release_resets_and_requeues() {
        let pool = small_pool(2);
        pool.initial(2).expect("initial");

        let handle = pool.acquire().expect("acquire");
        let clone = handle.clone();
        drop(handle);
        // Still one live reference; nothing recycled yet.
        assert_eq!(pool.usage(), 1);
        drop(clone);
        assert_eq!(pool.usage(), 0);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn shrink_never_drops_below_floor() {
        let pool = small_pool(4);
        pool.initial(32).expect("initial");

        for _ in 0..16 {
            pool.shrink();
        }
        assert!(pool.capacity() >= 4);
        assert_eq!(pool.usage() + pool.idle(), pool.capacity());
    }

    #[test]
    fn shrink_skipped_while_usage_high() {
        let pool = small_pool(2);
        pool.initial(8).expect("initial");

        let _held: Vec<_> = (0..6).map(|_| pool.acquire().expect("acquire")).collect();
        pool.shrink();
        assert_eq!(pool.capacity(), 8);
    }

    #[test]
    fn handle_survives_pool_teardown() {
        let pool = small_pool(2);
        pool.initial(2).expect("initial");

        let handle = pool.acquire().expect("acquire");
        drop(pool);
        assert!(handle.is_available());
        drop(handle); // destroys the element directly; must not panic
    }

    #[test]
    fn concurrent_acquire_release_preserves_invariant() {
        let pool = small_pool(8);
        pool.initial(8).expect("initial");

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let h = pool.acquire().expect("acquire");
                        assert!(h.is_available());
                        drop(h);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().expect("worker");
        }

        assert_eq!(pool.usage(), 0);
        assert_eq!(pool.usage() + pool.idle(), pool.capacity());
    }
}
