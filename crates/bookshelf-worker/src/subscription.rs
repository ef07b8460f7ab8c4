//! Push listeners for manager snapshots.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::warn;

use crate::job::UploadSnapshot;

/// Callback receiving the full snapshot after every manager mutation.
pub type Listener = Arc<dyn Fn(&UploadSnapshot) + Send + Sync>;

/// Registered listeners, in subscription order.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Listener)>>,
}

impl Listeners {
    pub(crate) fn add(self: &Arc<Self>, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        Subscription {
            id,
            listeners: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(entry, _)| *entry != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Call every listener with `snapshot`. A panicking listener is logged
    /// and skipped; the rest still run.
    pub(crate) fn notify(&self, snapshot: &UploadSnapshot) {
        // Listeners may subscribe or unsubscribe while being called.
        let current: Vec<(u64, Listener)> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (id, listener) in current {
            if catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
                warn!(listener = id, "Upload listener panicked; continuing with the rest");
            }
        }
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.len())
            .finish()
    }
}

/// Handle returned by `UploadManager::subscribe`.
///
/// The listener stays attached while this value lives.
#[must_use = "dropping a Subscription detaches its listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    /// Detach the listener now.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, Listener) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let listener: Listener = Arc::new(move |_: &UploadSnapshot| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, listener)
    }

    #[test]
    fn test_drop_detaches() {
        let listeners = Arc::new(Listeners::default());
        let (count, listener) = counter();

        let subscription = listeners.add(listener);
        listeners.notify(&UploadSnapshot::default());
        drop(subscription);
        listeners.notify(&UploadSnapshot::default());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let listeners = Arc::new(Listeners::default());
        let _bad = listeners.add(Arc::new(|_: &UploadSnapshot| panic!("listener bug")));
        let (count, listener) = counter();
        let _good = listeners.add(listener);

        listeners.notify(&UploadSnapshot::default());
        listeners.notify(&UploadSnapshot::default());

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_subscription_outliving_registry() {
        let listeners = Arc::new(Listeners::default());
        let (_, listener) = counter();
        let subscription = listeners.add(listener);
        drop(listeners);
        subscription.unsubscribe();
    }
}
