//! One-to-many event broadcast over a registry of non-owning observer handles.
//!
//! A [`Notifier`] never keeps an observer alive: it stores [`Weak`] handles,
//! skips observers whose last owner has gone away, and prunes them on the
//! next notification. Delivery happens synchronously on the caller's thread
//! against a snapshot of the registry, so observers may register or
//! unregister from any thread (including from inside a callback) without
//! blocking a notification in flight.

use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

use crate::observer::{DetectorStateObserver, KeywordObserver};

/// Notifier carrying keyword detections
pub type KeywordNotifier = Notifier<dyn KeywordObserver>;

/// Notifier carrying detector state transitions
pub type StateNotifier = Notifier<dyn DetectorStateObserver>;

pub struct Notifier<O: ?Sized> {
    observers: Mutex<Vec<Weak<O>>>,
}

impl<O: ?Sized> Notifier<O> {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Register `observer` without taking ownership of it.
    ///
    /// Returns `false` if it was already registered.
    pub fn add_observer(&self, observer: &Arc<O>) -> bool {
        let handle = Arc::downgrade(observer);
        let mut observers = self.observers.lock();
        if observers.iter().any(|existing| Weak::ptr_eq(existing, &handle)) {
            return false;
        }
        observers.push(handle);
        trace!("Observer added ({} registered)", observers.len());
        true
    }

    /// Unregister `observer`.
    ///
    /// Returns `false` if it was not registered.
    pub fn remove_observer(&self, observer: &Arc<O>) -> bool {
        let handle = Arc::downgrade(observer);
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|existing| !Weak::ptr_eq(existing, &handle));
        let removed = observers.len() != before;
        if removed {
            trace!("Observer removed ({} registered)", observers.len());
        }
        removed
    }

    /// Number of registered observers that are still alive
    pub fn len(&self) -> usize {
        self.observers
            .lock()
            .iter()
            .filter(|observer| observer.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke `notify` once for every live observer.
    ///
    /// The registry is snapshotted up front: observers added while this runs
    /// miss the event, observers removed while this runs may still get it. A
    /// panicking observer is logged and skipped. Returns the number of
    /// observers that handled the event without panicking.
    pub fn notify<F>(&self, notify: F) -> usize
    where
        F: Fn(&O),
    {
        let snapshot: Vec<Arc<O>> = {
            let mut observers = self.observers.lock();
            observers.retain(|observer| observer.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };

        let mut delivered = 0;
        for observer in &snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| notify(observer.as_ref())));
            match result {
                Ok(()) => delivered += 1,
                Err(_) => warn!("Observer panicked during notification, continuing"),
            }
        }

        delivered
    }
}

impl<O: ?Sized> Default for Notifier<O> {
    fn default() -> Self {
        Self::new()
    }
}
