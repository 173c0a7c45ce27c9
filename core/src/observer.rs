//! Plain multicast subscription list.
//!
//! Used twice: each store keeps one for its own `StoreEvent`s, and each
//! in-process backend handle keeps one for the `StorageEvent`s it receives
//! from other contexts.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};


/// Handle returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;


/// Ordered list of callbacks that all receive every notified event.
pub struct ObserverList<E> {
    observers: RwLock<Vec<(ObserverId, Callback<E>)>>,
    next_id: AtomicU64,
}

impl<E> ObserverList<E> {
    pub fn new() -> Self {
        ObserverList {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a callback. Callbacks fire in subscription order.
    pub fn subscribe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.write().push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns false if the id was not subscribed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Deliver an event to every current subscriber.
    ///
    /// The list is snapshotted first, so callbacks may subscribe,
    /// unsubscribe or notify again without deadlocking. A panicking
    /// callback is logged and skipped; the rest still run.
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<(ObserverId, Callback<E>)> = self.read().clone();
        for (id, callback) in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(event)));
            if outcome.is_err() {
                tracing::error!(observer = ?id, "observer panicked during notification");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // -------------------------------------------------------------------
    // Internal
    // -------------------------------------------------------------------

    // A poisoned lock only means a writer panicked mid-push/retain; the
    // Vec itself is still valid.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<(ObserverId, Callback<E>)>> {
        self.observers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<(ObserverId, Callback<E>)>> {
        self.observers.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl<E> Default for ObserverList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ObserverList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverList")
            .field("observers", &self.len())
            .finish()
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
