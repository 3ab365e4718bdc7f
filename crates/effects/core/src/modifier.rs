//! Value modifiers.
//!
//! A [`Modifier`] contributes to a property's computed value. Cells fold their
//! modifiers in attachment order, feeding each one the base value and the
//! running result. When whatever a modifier depends on changes, it calls
//! [`Modifier::invalidate`] and every cell holding it recomputes.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::observe::{Handlers, SubscriptionId};
use crate::property::PropertyValue;

/// Unique identity of a modifier instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModifierId(u64);

impl ModifierId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ModifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "modifier#{}", self.0)
    }
}

/// Opaque key grouping modifiers that should not stack with each other.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StackingKey(String);

impl StackingKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Computes a modified value from `(base, current)`.
pub trait ValueModifier<T>: Send + Sync {
    fn provide_value(&self, base: &T, current: &T) -> T;
}

impl<T, F> ValueModifier<T> for F
where
    F: Fn(&T, &T) -> T + Send + Sync,
{
    fn provide_value(&self, base: &T, current: &T) -> T {
        self(base, current)
    }
}

/// A shared, observable value transformation.
pub struct Modifier<T: PropertyValue> {
    id: ModifierId,
    function: Box<dyn ValueModifier<T>>,
    stacking_key: Option<StackingKey>,
    invalidated: Handlers<()>,
    suspend_depth: AtomicUsize,
}

impl<T: PropertyValue> Modifier<T> {
    pub fn new(function: impl ValueModifier<T> + 'static) -> Arc<Self> {
        Arc::new(Self {
            id: ModifierId::next(),
            function: Box::new(function),
            stacking_key: None,
            invalidated: Handlers::new(),
            suspend_depth: AtomicUsize::new(0),
        })
    }

    pub fn with_stacking_key(
        function: impl ValueModifier<T> + 'static,
        key: StackingKey,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ModifierId::next(),
            function: Box::new(function),
            stacking_key: Some(key),
            invalidated: Handlers::new(),
            suspend_depth: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> ModifierId {
        self.id
    }

    pub fn stacking_key(&self) -> Option<&StackingKey> {
        self.stacking_key.as_ref()
    }

    /// Applies the modifier. A suspended modifier passes `current` through.
    pub fn provide_value(&self, base: &T, current: &T) -> T {
        if self.is_suspended() {
            current.clone()
        } else {
            self.function.provide_value(base, current)
        }
    }

    /// Notifies every holder that this modifier's output may have changed.
    ///
    /// Swallowed while the modifier is suspended.
    pub fn invalidate(&self) {
        if self.is_suspended() {
            return;
        }
        self.invalidated.emit(&());
    }

    pub fn subscribe(&self, handler: impl Fn(&()) + Send + Sync + 'static) -> SubscriptionId {
        self.invalidated.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.invalidated.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.invalidated.len()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_depth.load(Ordering::Acquire) > 0
    }

    /// Stops the modifier from contributing until the returned guard is dropped.
    ///
    /// Suspensions nest. Holders are invalidated once when the first
    /// suspension begins and once when the last one ends.
    pub fn suspend(self: &Arc<Self>) -> ModifierSuspension<T> {
        if self.suspend_depth.fetch_add(1, Ordering::AcqRel) == 0 {
            self.invalidated.emit(&());
        }
        ModifierSuspension {
            modifier: Arc::clone(self),
        }
    }
}

impl<T: PropertyValue> fmt::Debug for Modifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Modifier")
            .field("id", &self.id)
            .field("stacking_key", &self.stacking_key)
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

/// Guard returned by [`Modifier::suspend`].
#[must_use = "the modifier resumes as soon as the guard is dropped"]
pub struct ModifierSuspension<T: PropertyValue> {
    modifier: Arc<Modifier<T>>,
}

impl<T: PropertyValue> ModifierSuspension<T> {
    pub fn modifier(&self) -> &Arc<Modifier<T>> {
        &self.modifier
    }
}

impl<T: PropertyValue> Drop for ModifierSuspension<T> {
    fn drop(&mut self) {
        if self.modifier.suspend_depth.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.modifier.invalidated.emit(&());
        }
    }
}
