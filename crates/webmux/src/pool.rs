//! Free-list of reusable per-request objects

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

/// Objects that can be returned to a [`Pool`]
pub trait Reset {
    /// Drop every piece of request-specific state.
    fn reset(&mut self);
}

struct Shared<T> {
    idle: Mutex<Vec<T>>,
    max_idle: usize,
}

/// A bounded pool of `T` values.
///
/// Items are handed out as [`Pooled`] guards. The guard resets its item and
/// hands it back when dropped, so a value is never visible to two requests.
pub struct Pool<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Reset + Default> Pool<T> {
    /// Create a pool that keeps at most `max_idle` released items around
    pub fn new(max_idle: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                idle: Mutex::new(Vec::with_capacity(max_idle)),
                max_idle,
            }),
        }
    }

    /// Take an idle item or build a fresh one
    pub fn acquire(&self) -> Pooled<T> {
        let item = self
            .shared
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();
        Pooled {
            item,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of items waiting for reuse
    pub fn idle(&self) -> usize {
        self.shared
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// An item on loan from a [`Pool`]
pub struct Pooled<T: Reset + Default> {
    item: T,
    shared: Arc<Shared<T>>,
}

impl<T: Reset + Default> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T: Reset + Default> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.item
    }
}

impl<T: Reset + Default> Drop for Pooled<T> {
    fn drop(&mut self) {
        let mut item = std::mem::take(&mut self.item);
        item.reset();

        let mut idle = self.shared.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.shared.max_idle {
            idle.push(item);
        }
    }
}

impl<T: Reset + Default + std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.item.fmt(f)
    }
}
