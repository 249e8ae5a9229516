//! Listener registries and cancellable subscription handles.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;

/// Identifier of a registration in a [`QuerySubscriptions`] registry.
///
/// Identifiers are never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuerySubscriptionId(pub u64);

/// A registry of listeners.
///
/// Registrations are either durable or temporary; only durable ones count
/// towards [`QuerySubscriptions::has_durable`]. Handlers are always invoked
/// on a snapshot, so a handler may add or remove registrations (including
/// its own) while being called.
pub struct QuerySubscriptions<H> {
    inner: Mutex<Registry<H>>,
}

struct Registry<H> {
    next_id: u64,
    entries: BTreeMap<QuerySubscriptionId, Registration<H>>,
    durable: usize,
}

struct Registration<H> {
    handler: H,
    temporary: bool,
}

/// Outcome of [`QuerySubscriptions::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inserted {
    /// The new registration's id.
    pub id: QuerySubscriptionId,
    /// The registration is durable and no other durable one existed.
    pub is_first_durable: bool,
}

/// Outcome of [`QuerySubscriptions::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removed {
    /// The removed registration was durable and no durable one remains.
    pub was_last_durable: bool,
}

impl<H: Clone> QuerySubscriptions<H> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Registry {
                next_id: 0,
                entries: BTreeMap::new(),
                durable: 0,
            }),
        }
    }

    /// Register `handler`.
    pub fn insert(&self, handler: H, temporary: bool) -> Inserted {
        let mut registry = self.inner.lock();
        let id = QuerySubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry.entries.insert(id, Registration { handler, temporary });
        let is_first_durable = if temporary {
            false
        } else {
            registry.durable += 1;
            registry.durable == 1
        };
        Inserted {
            id,
            is_first_durable,
        }
    }

    /// Remove a registration. Returns `None` if it was already removed.
    pub fn remove(&self, id: QuerySubscriptionId) -> Option<Removed> {
        let mut registry = self.inner.lock();
        let registration = registry.entries.remove(&id)?;
        let was_last_durable = if registration.temporary {
            false
        } else {
            registry.durable -= 1;
            registry.durable == 0
        };
        Some(Removed { was_last_durable })
    }

    /// Snapshot of all handlers in registration order.
    pub fn handlers(&self) -> Vec<H> {
        self.inner
            .lock()
            .entries
            .values()
            .map(|registration| registration.handler.clone())
            .collect()
    }

    /// Call `f` on a snapshot of all handlers in registration order.
    pub fn for_each(&self, mut f: impl FnMut(&H)) {
        for handler in self.handlers() {
            f(&handler);
        }
    }

    /// Number of registrations, temporary ones included.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if there are no registrations.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Number of durable registrations.
    pub fn durable_count(&self) -> usize {
        self.inner.lock().durable
    }

    /// Check if at least one durable registration exists.
    pub fn has_durable(&self) -> bool {
        self.durable_count() > 0
    }
}

impl<H: Clone> Default for QuerySubscriptions<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> fmt::Debug for QuerySubscriptions<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.lock();
        f.debug_struct("QuerySubscriptions")
            .field("len", &registry.entries.len())
            .field("durable", &registry.durable)
            .finish()
    }
}

/// A handle that unregisters something when cancelled or dropped.
#[must_use = "dropping a subscription cancels it"]
pub struct QuerySubscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl QuerySubscription {
    /// Create a subscription that runs `cancel` once.
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to cancel.
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    /// A subscription that cancels all of `subscriptions` together.
    pub fn combined(subscriptions: Vec<QuerySubscription>) -> Self {
        Self::new(move || drop(subscriptions))
    }

    /// Cancel now.
    pub fn cancel(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for QuerySubscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for QuerySubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
