//! Identifier-plus-weak-reference handle values.
//!
//! A handle is proof of *identity*, never of *liveness*: the integer may
//! have been recycled onto a new owner after the original died, so validity
//! requires both a positive identifier and an unexpired weak reference.
//! Hashing and equality go by identifier alone, letting handles key the
//! listener and timer side tables.

use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

/// Value-type reference to a live object: stable integer id + weak link.
pub struct Handle<T: ?Sized> {
    id: i64,
    target: Option<Weak<T>>,
}

impl<T: ?Sized> Handle<T> {
    pub fn new(id: i64, target: Weak<T>) -> Self {
        Self {
            id,
            target: Some(target),
        }
    }

    /// A handle carrying only an identifier; never valid.
    pub fn detached(id: i64) -> Self {
        Self { id, target: None }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Both conditions must hold; the id alone proves nothing.
    pub fn is_valid(&self) -> bool {
        self.id > 0
            && self
                .target
                .as_ref()
                .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Upgrade to the live target, if it still exists.
    pub fn get(&self) -> Option<Arc<T>> {
        if self.id <= 0 {
            return None;
        }
        self.target.as_ref().and_then(Weak::upgrade)
    }
}

impl<T: ?Sized> Default for Handle<T> {
    fn default() -> Self {
        Self::detached(-1)
    }
}

impl<T: ?Sized> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            target: self.target.clone(),
        }
    }
}

impl<T: ?Sized> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: ?Sized> Eq for Handle<T> {}

impl<T: ?Sized> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: ?Sized> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_needs_id_and_liveness() {
        let target = Arc::new(42u32);
        let handle = Handle::new(7, Arc::downgrade(&target));
        assert!(handle.is_valid());
        assert_eq!(handle.get().as_deref(), Some(&42));

        drop(target);
        assert!(!handle.is_valid());
        assert!(handle.get().is_none());
    }

    #[test]
    fn nonpositive_id_is_never_valid() {
        let target = Arc::new(1u32);
        let handle = Handle::new(0, Arc::downgrade(&target));
        assert!(!handle.is_valid());
        assert!(handle.get().is_none());

        let detached: Handle<u32> = Handle::default();
        assert!(!detached.is_valid());
    }

    #[test]
    fn equality_and_hash_by_id_only() {
        use std::collections::HashSet;

        let a = Arc::new(1u32);
        let b = Arc::new(2u32);
        let ha = Handle::new(5, Arc::downgrade(&a));
        let hb = Handle::new(5, Arc::downgrade(&b));
        assert_eq!(ha, hb);

        let mut set = HashSet::new();
        set.insert(ha);
        assert!(set.contains(&hb));
    }
}
