//! Lightweight synchronous observer lists.
//!
//! Handlers are invoked outside the list's own lock, on a snapshot taken at
//! emit time, so a handler may subscribe or unsubscribe (itself included)
//! while being notified.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::sync::lock;

/// Identifies a subscription; unique for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Shared callback invoked with the event arguments.
pub type Handler<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Ordered list of event handlers.
pub struct Handlers<A> {
    entries: Mutex<Vec<(SubscriptionId, Handler<A>)>>,
}

impl<A> Handlers<A> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, handler: impl Fn(&A) + Send + Sync + 'static) -> SubscriptionId {
        self.subscribe_shared(Arc::new(handler))
    }

    pub fn subscribe_shared(&self, handler: Handler<A>) -> SubscriptionId {
        let id = SubscriptionId::next();
        lock(&self.entries).push((id, handler));
        id
    }

    /// Removes a handler. Returns false if the id was not subscribed here.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = lock(&self.entries);
        match entries.iter().position(|(candidate, _)| *candidate == id) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Invokes every handler in subscription order.
    pub fn emit(&self, args: &A) {
        let snapshot: Vec<Handler<A>> = lock(&self.entries)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in snapshot {
            handler(args);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A> Default for Handlers<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for Handlers<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("len", &self.len())
            .finish()
    }
}
