//! Observable value sources.
//!
//! Effect bindings never poll. Every input an effect depends on (activation
//! predicates, scopes, effect values) is exposed as a [`ValueProvider`] that
//! notifies subscribers when its value may have changed.

use std::fmt;
use std::sync::{Arc, Mutex};

use effects_core::{
    Handler, Handlers, PropertyCell, PropertyValue, SubscriptionId, lock,
};

/// Callback invoked when a provider's value may have changed.
pub type ChangeHandler = Handler<()>;

/// A readable, observable value.
pub trait ValueProvider<T>: Send + Sync {
    /// Reads the value as of now.
    fn value(&self) -> T;

    /// Registers `handler` to run whenever the value may have changed.
    fn subscribe(&self, handler: ChangeHandler) -> SubscriptionId;

    /// Removes a handler. Returns false if `id` was unknown.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// A settable value that notifies subscribers on change.
pub struct ObservableValue<T> {
    value: Mutex<T>,
    changed: Handlers<()>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ObservableValue<T> {
    /// Creates a shared value holding `value`.
    pub fn new(value: T) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(value),
            changed: Handlers::new(),
        })
    }

    /// Clones the current value.
    pub fn get(&self) -> T {
        lock(&self.value).clone()
    }

    /// Stores `value`, notifying subscribers if it differs. Returns true on change.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = lock(&self.value);
            if *current == value {
                return false;
            }
            *current = value;
        }
        self.changed.emit(&());
        true
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ValueProvider<T> for ObservableValue<T> {
    fn value(&self) -> T {
        self.get()
    }

    fn subscribe(&self, handler: ChangeHandler) -> SubscriptionId {
        self.changed.subscribe_shared(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.changed.unsubscribe(id)
    }
}

impl<T: fmt::Debug> fmt::Debug for ObservableValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObservableValue")
            .field(&*lock(&self.value))
            .finish()
    }
}

/// A provider whose value never changes.
pub struct ConstantValue<T> {
    value: T,
    subscribers: Handlers<()>,
}

impl<T: Clone + Send + Sync + 'static> ConstantValue<T> {
    /// Wraps `value`. Subscriptions are accepted but never fire.
    pub fn new(value: T) -> Arc<Self> {
        Arc::new(Self {
            value,
            subscribers: Handlers::new(),
        })
    }
}

impl<T: Clone + Send + Sync + 'static> ValueProvider<T> for ConstantValue<T> {
    fn value(&self) -> T {
        self.value.clone()
    }

    fn subscribe(&self, handler: ChangeHandler) -> SubscriptionId {
        self.subscribers.subscribe_shared(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }
}

/// A provider deriving its value from another provider.
pub struct MappedValue<S, T> {
    source: Arc<dyn ValueProvider<S>>,
    map: Box<dyn Fn(S) -> T + Send + Sync>,
}

impl<S: 'static, T: 'static> ValueProvider<T> for MappedValue<S, T> {
    fn value(&self) -> T {
        (self.map)(self.source.value())
    }

    fn subscribe(&self, handler: ChangeHandler) -> SubscriptionId {
        self.source.subscribe(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.source.unsubscribe(id)
    }
}

/// Wraps `source` so that readers see `map(source.value())`.
pub fn map_value<S: 'static, T: 'static>(
    source: Arc<dyn ValueProvider<S>>,
    map: impl Fn(S) -> T + Send + Sync + 'static,
) -> Arc<dyn ValueProvider<T>> {
    Arc::new(MappedValue {
        source,
        map: Box::new(map),
    })
}

/// Exposes a property cell's effective value as a provider.
pub struct CellValueProvider<T: PropertyValue> {
    cell: Arc<PropertyCell<T>>,
}

impl<T: PropertyValue> CellValueProvider<T> {
    /// Follows the current value of `cell`.
    pub fn new(cell: Arc<PropertyCell<T>>) -> Arc<Self> {
        Arc::new(Self { cell })
    }
}

impl<T: PropertyValue> ValueProvider<T> for CellValueProvider<T> {
    fn value(&self) -> T {
        self.cell.current_value().unwrap_or_else(|error| {
            tracing::warn!(
                target: "effects::engine",
                property = self.cell.property().name(),
                %error,
                "falling back to base value"
            );
            self.cell.base_value()
        })
    }

    fn subscribe(&self, handler: ChangeHandler) -> SubscriptionId {
        self.cell.on_current_value_changed(move |_| handler(&()))
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.cell.unsubscribe_current_value_changed(id)
    }
}

/// Change notification raised by an [`ObservableCollection`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollectionChange<T> {
    Added(Vec<T>),
    Removed(Vec<T>),
    Replaced { old: Vec<T>, new: Vec<T> },
    Moved,
    Reset,
}

/// A list that reports structural changes to subscribers.
pub struct ObservableCollection<T> {
    items: Mutex<Vec<T>>,
    changed: Handlers<CollectionChange<T>>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ObservableCollection<T> {
    /// Creates an empty collection.
    pub fn new() -> Arc<Self> {
        Self::from_items(Vec::new())
    }

    /// Creates a collection seeded with `items` without raising a change.
    pub fn from_items(items: Vec<T>) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(items),
            changed: Handlers::new(),
        })
    }

    /// Snapshot of the items in order.
    pub fn items(&self) -> Vec<T> {
        lock(&self.items).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if any item equals `item`.
    pub fn contains(&self, item: &T) -> bool {
        lock(&self.items).contains(item)
    }

    /// Appends `item` and reports it as added.
    pub fn push(&self, item: T) {
        lock(&self.items).push(item.clone());
        self.changed.emit(&CollectionChange::Added(vec![item]));
    }

    /// Removes the first occurrence of `item`.
    pub fn remove(&self, item: &T) -> bool {
        {
            let mut items = lock(&self.items);
            let Some(position) = items.iter().position(|candidate| candidate == item) else {
                return false;
            };
            items.remove(position);
        }
        self.changed
            .emit(&CollectionChange::Removed(vec![item.clone()]));
        true
    }

    /// Replaces the first occurrence of `old` with `new` in place.
    pub fn replace(&self, old: &T, new: T) -> bool {
        {
            let mut items = lock(&self.items);
            let Some(slot) = items.iter_mut().find(|candidate| *candidate == old) else {
                return false;
            };
            *slot = new.clone();
        }
        self.changed.emit(&CollectionChange::Replaced {
            old: vec![old.clone()],
            new: vec![new],
        });
        true
    }

    /// Moves the item at `from` to `to`. Returns false if either index is out of range.
    pub fn move_item(&self, from: usize, to: usize) -> bool {
        {
            let mut items = lock(&self.items);
            if from >= items.len() || to >= items.len() {
                return false;
            }
            let item = items.remove(from);
            items.insert(to, item);
        }
        self.changed.emit(&CollectionChange::Moved);
        true
    }

    /// Replaces the whole contents.
    pub fn reset(&self, items: Vec<T>) {
        *lock(&self.items) = items;
        self.changed.emit(&CollectionChange::Reset);
    }

    /// Removes every item, reported as a reset.
    pub fn clear(&self) {
        self.reset(Vec::new());
    }

    /// Registers `handler` for every structural change.
    pub fn subscribe(
        &self,
        handler: impl Fn(&CollectionChange<T>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.changed.subscribe(handler)
    }

    /// Removes a change handler. Returns false if `id` was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.changed.unsubscribe(id)
    }

    /// Number of live change handlers.
    pub fn subscriber_count(&self) -> usize {
        self.changed.len()
    }
}

impl<T> fmt::Debug for ObservableCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableCollection")
            .field("len", &lock(&self.items).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn observable_value_notifies_only_on_change() {
        let value = ObservableValue::new(3);
        let hits = Arc::new(AtomicUsize::new(0));
        let id = {
            let hits = Arc::clone(&hits);
            value.subscribe(Arc::new(move |_: &()| {
                hits.fetch_add(1, Ordering::SeqCst);
            }))
        };

        assert!(!value.set(3));
        assert!(value.set(4));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(value.unsubscribe(id));
        value.set(5);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mapped_value_forwards_subscriptions() {
        let source = ObservableValue::new(1_000);
        let above = map_value(source.clone() as Arc<dyn ValueProvider<i32>>, |v| v > 1_000);
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            above.subscribe(Arc::new(move |_: &()| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert!(!above.value());
        source.set(1_001);
        assert!(above.value());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn collection_reports_each_change_kind() {
        let collection = ObservableCollection::from_items(vec!["a", "b"]);
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let log = Arc::clone(&log);
            collection.subscribe(move |change| lock(&log).push(change.clone()));
        }

        collection.push("c");
        assert!(collection.remove(&"a"));
        assert!(!collection.remove(&"zz"));
        assert!(collection.replace(&"b", "d"));
        assert!(collection.move_item(0, 1));
        collection.clear();

        assert_eq!(
            *lock(&log),
            vec![
                CollectionChange::Added(vec!["c"]),
                CollectionChange::Removed(vec!["a"]),
                CollectionChange::Replaced {
                    old: vec!["b"],
                    new: vec!["d"]
                },
                CollectionChange::Moved,
                CollectionChange::Reset,
            ]
        );
        assert!(collection.is_empty());
    }
}
