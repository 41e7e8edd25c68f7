//! Observer registry with disposable subscriptions.
//!
//! Handlers are plain closures.  Delivery iterates a snapshot of the handler
//! list taken without holding the lock, so a handler may subscribe or
//! unsubscribe (itself or others) while being called.  A handler removed
//! during a delivery pass is not called for the remainder of that pass.
//!
//! A panicking handler is logged and skipped; it never takes the session
//! actor down with it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::error;

struct Slots<T: ?Sized> {
    next_id: u64,
    handlers: Vec<(u64, Arc<dyn Fn(&T) + Send + Sync>)>,
}

/// A set of handlers receiving `&T`.
pub struct Registry<T: ?Sized> {
    slots: Arc<Mutex<Slots<T>>>,
}

impl<T: ?Sized> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<T: ?Sized + 'static> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> Registry<T> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    /// Registers `handler` and returns the disposer that removes it.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let handler: Arc<dyn Fn(&T) + Send + Sync> = Arc::new(handler);
        let id = {
            let mut slots = lock(&self.slots);
            let id = slots.next_id;
            slots.next_id += 1;
            slots.handlers.push((id, handler));
            id
        };

        let slots = Arc::downgrade(&self.slots);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(slots) = slots.upgrade() {
                    lock(&slots).handlers.retain(|(other, _)| *other != id);
                }
            })),
        }
    }

    /// Calls every registered handler with `value`.
    pub fn notify(&self, value: &T) {
        let snapshot = lock(&self.slots).handlers.clone();
        for (id, handler) in snapshot {
            if !self.contains(id) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
                error!(subscriber = id, "subscriber panicked; continuing delivery");
            }
        }
    }

    /// Number of live handlers.
    pub fn len(&self) -> usize {
        lock(&self.slots).handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, id: u64) -> bool {
        lock(&self.slots).handlers.iter().any(|(other, _)| *other == id)
    }
}

fn lock<T: ?Sized>(slots: &Mutex<Slots<T>>) -> MutexGuard<'_, Slots<T>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Disposer returned by [`Registry::subscribe`].
///
/// The handler stays registered until [`Subscription::unsubscribe`] is called
/// or the subscription is dropped.
#[must_use = "dropping a Subscription unsubscribes the handler immediately"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Removes the handler.  Calling this more than once is harmless.
    pub fn unsubscribe(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
