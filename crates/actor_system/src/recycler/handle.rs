//! Reference-counted handle to a pooled element.

use super::{PoolCore, Recyclable};
use std::ops::Deref;
use std::sync::{Arc, Weak};

/// Owner slot shared by all clones of one handle.
///
/// `elem` is `Some` for the slot's whole lifetime; it is only taken in
/// `Drop`, after the last handle clone has gone away.
struct Slot<T: Recyclable> {
    elem: Option<Box<T>>,
    pool: Weak<PoolCore<T>>,
}

impl<T: Recyclable> Drop for Slot<T> {
    fn drop(&mut self) {
        if let Some(elem) = self.elem.take() {
            match self.pool.upgrade() {
                // Pool still alive: reset and requeue.
                Some(pool) => pool.release(elem),
                // Pool torn down first: destroy the element directly.
                None => drop(elem),
            }
        }
    }
}

/// Shared ownership of one checked-out pooled element.
///
/// Clones are cheap reference-count bumps. Exclusive mutation is available
/// through [`RecycleHandle::get_mut`] only while no clone exists, mirroring
/// `Arc::get_mut`: producers fill an element right after acquiring it, then
/// clone the handle freely to fan it out read-only.
pub struct RecycleHandle<T: Recyclable> {
    slot: Arc<Slot<T>>,
}

impl<T: Recyclable> RecycleHandle<T> {
    pub(super) fn new(elem: Box<T>, pool: Weak<PoolCore<T>>) -> Self {
        Self {
            slot: Arc::new(Slot {
                elem: Some(elem),
                pool,
            }),
        }
    }

    /// Exclusive access to the element, available only while this is the
    /// sole handle referencing it.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        Arc::get_mut(&mut self.slot).and_then(|slot| slot.elem.as_deref_mut())
    }

    /// Number of live handles sharing this element.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.slot)
    }
}

impl<T: Recyclable> Clone for RecycleHandle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Recyclable> Deref for RecycleHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.slot.elem.as_deref() {
            Some(elem) => elem,
            // `elem` is Some until Slot::drop, which cannot run while a
            // handle still borrows the slot.
            None => unreachable!("pooled element taken while handle live"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{PoolConfig, Recycler};
    use super::*;

    #[derive(Default)]
    struct Buffer {
        data: Vec<u8>,
    }

    impl Recyclable for Buffer {
        fn initial(&mut self) {
            self.data.clear();
        }

        fn reset(&mut self) {
            self.data.clear();
        }

        fn is_unused(&self) -> bool {
            self.data.is_empty()
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    #[test]
    fn get_mut_requires_unique_ownership() {
        let pool: Recycler<Buffer> = Recycler::new(PoolConfig::default());
        pool.initial(2).expect("initial");

        let mut handle = pool.acquire().expect("acquire");
        handle
            .get_mut()
            .expect("unique handle is mutable")
            .data
            .extend_from_slice(b"abc");

        let clone = handle.clone();
        assert!(handle.get_mut().is_none());
        assert_eq!(clone.data, b"abc");
        assert_eq!(handle.ref_count(), 2);

        drop(clone);
        assert!(handle.get_mut().is_some());
    }
}
