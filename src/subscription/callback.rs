// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Observer storage and dispatch.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::stream::RawEvent;

/// Unique identifier for an observer registration.
///
/// Returned by [`ObserverRegistry::subscribe`] and used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[must_use]
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", self.0)
    }
}

/// Callback invoked with every dispatched raw event.
type Observer = Arc<dyn Fn(&RawEvent) + Send + Sync>;

/// Registry of stream observers.
///
/// Callbacks run synchronously on the dispatching task, after the event has
/// been handled. They are cloned out of the lock before being called, so an
/// observer may subscribe or unsubscribe without deadlocking. A panicking
/// observer is caught and logged; the remaining observers still run.
pub struct ObserverRegistry {
    next_id: AtomicU64,
    observers: RwLock<HashMap<SubscriptionId, Observer>>,
}

impl ObserverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            observers: RwLock::new(HashMap::new()),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers an observer.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&RawEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.observers.write().insert(id, Arc::new(callback));
        id
    }

    /// Unregisters an observer.
    ///
    /// Returns `true` if an observer was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.write().remove(&id).is_some()
    }

    /// Removes every observer.
    pub fn clear(&self) {
        self.observers.write().clear();
    }

    /// Calls every observer with the event.
    ///
    /// Returns the number of observers that returned without panicking.
    pub fn dispatch(&self, event: &RawEvent) -> usize {
        let observers: Vec<(SubscriptionId, Observer)> = self
            .observers
            .read()
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        let mut completed = 0;
        for (id, observer) in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(event))).is_ok() {
                completed += 1;
            } else {
                tracing::error!(subscription = %id, event = %event.event, "Stream observer panicked");
            }
        }
        completed
    }

    /// Returns the number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Returns `true` if no observer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observer_count", &self.len())
            .finish()
    }
}
