//! Frugal sparse storage keyed by small integers.
//!
//! Most entities carry only a handful of property values, so a
//! [`SparseSlotMap`] starts with no allocation at all and promotes itself
//! through progressively larger representations as entries are added:
//!
//! | tier     | capacity | lookup          | ordering                    |
//! |----------|----------|-----------------|-----------------------------|
//! | `single` | 1        | compare         | -                           |
//! | `small`  | 6        | linear (inline) | insertion order until sort  |
//! | `array`  | 15       | linear          | insertion order until sort  |
//! | `sorted` | 128      | binary search   | always sorted               |
//! | `hash`   | unbounded| hash index      | insertion order until sort  |
//!
//! Removing entries never demotes a map, except that removing the last entry
//! drops the storage entirely.

use std::collections::HashMap;

use arrayvec::ArrayVec;

use crate::config::SystemConfig;
use crate::error::SlotMapError;

const SMALL: usize = SystemConfig::SMALL_TIER_CAPACITY;
const ARRAY: usize = SystemConfig::ARRAY_TIER_CAPACITY;
const SORTED: usize = SystemConfig::SORTED_TIER_CAPACITY;

/// A key/value pair stored in a slot map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry<V> {
    pub key: u32,
    pub value: V,
}

/// Storage representation currently used by a [`SparseSlotMap`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Tier {
    Empty,
    Single,
    Small,
    Array,
    Sorted,
    Hash,
}

impl Tier {
    const fn capacity(self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Single => 1,
            Self::Small => SMALL,
            Self::Array => ARRAY,
            Self::Sorted => SORTED,
            Self::Hash => usize::MAX,
        }
    }
}

#[derive(Clone, Debug)]
enum Store<V> {
    Single(ArrayVec<Entry<V>, 1>),
    Small(ArrayVec<Entry<V>, SMALL>),
    Array(Vec<Entry<V>>),
    Sorted(Vec<Entry<V>>),
    Hash {
        entries: Vec<Entry<V>>,
        index: HashMap<u32, usize>,
    },
}

enum Inserted<V> {
    Stored,
    Promote(Tier, Entry<V>),
}

impl<V> Store<V> {
    fn empty(tier: Tier) -> Option<Self> {
        match tier {
            Tier::Empty => None,
            Tier::Single => Some(Self::Single(ArrayVec::new())),
            Tier::Small => Some(Self::Small(ArrayVec::new())),
            Tier::Array => Some(Self::Array(Vec::with_capacity(ARRAY))),
            Tier::Sorted => Some(Self::Sorted(Vec::with_capacity(SORTED))),
            Tier::Hash => Some(Self::Hash {
                entries: Vec::new(),
                index: HashMap::new(),
            }),
        }
    }

    fn tier(&self) -> Tier {
        match self {
            Self::Single(_) => Tier::Single,
            Self::Small(_) => Tier::Small,
            Self::Array(_) => Tier::Array,
            Self::Sorted(_) => Tier::Sorted,
            Self::Hash { .. } => Tier::Hash,
        }
    }

    fn entries(&self) -> &[Entry<V>] {
        match self {
            Self::Single(entries) => entries,
            Self::Small(entries) => entries,
            Self::Array(entries) | Self::Sorted(entries) => entries,
            Self::Hash { entries, .. } => entries,
        }
    }

    fn position(&self, key: u32) -> Option<usize> {
        match self {
            Self::Sorted(entries) => entries.binary_search_by_key(&key, |e| e.key).ok(),
            Self::Hash { index, .. } => index.get(&key).copied(),
            _ => self.entries().iter().position(|e| e.key == key),
        }
    }

    fn value_at_mut(&mut self, position: usize) -> Option<&mut V> {
        let entry = match self {
            Self::Single(entries) => entries.get_mut(position),
            Self::Small(entries) => entries.get_mut(position),
            Self::Array(entries) | Self::Sorted(entries) => entries.get_mut(position),
            Self::Hash { entries, .. } => entries.get_mut(position),
        };
        entry.map(|e| &mut e.value)
    }

    fn insert(&mut self, entry: Entry<V>) -> Inserted<V> {
        if let Some(position) = self.position(entry.key)
            && let Some(slot) = self.value_at_mut(position)
        {
            *slot = entry.value;
            return Inserted::Stored;
        }

        match self {
            Self::Single(entries) => {
                if entries.is_full() {
                    return Inserted::Promote(Tier::Small, entry);
                }
                entries.push(entry);
            }
            Self::Small(entries) => {
                if entries.is_full() {
                    return Inserted::Promote(Tier::Array, entry);
                }
                entries.push(entry);
            }
            Self::Array(entries) => {
                if entries.len() >= ARRAY {
                    return Inserted::Promote(Tier::Sorted, entry);
                }
                entries.push(entry);
            }
            Self::Sorted(entries) => {
                if entries.len() >= SORTED {
                    return Inserted::Promote(Tier::Hash, entry);
                }
                let at = entries.partition_point(|e| e.key < entry.key);
                entries.insert(at, entry);
            }
            Self::Hash { entries, index } => {
                index.insert(entry.key, entries.len());
                entries.push(entry);
            }
        }
        Inserted::Stored
    }

    fn remove(&mut self, key: u32) -> Option<V> {
        let position = self.position(key)?;
        let removed = match self {
            Self::Single(entries) => entries.remove(position),
            Self::Small(entries) => entries.remove(position),
            Self::Array(entries) | Self::Sorted(entries) => entries.remove(position),
            Self::Hash { entries, index } => {
                index.remove(&key);
                let removed = entries.swap_remove(position);
                if let Some(moved) = entries.get(position) {
                    index.insert(moved.key, position);
                }
                removed
            }
        };
        Some(removed.value)
    }

    fn sort(&mut self) {
        match self {
            Self::Single(_) | Self::Sorted(_) => {}
            Self::Small(entries) => entries.sort_unstable_by_key(|e| e.key),
            Self::Array(entries) => entries.sort_unstable_by_key(|e| e.key),
            Self::Hash { entries, index } => {
                entries.sort_unstable_by_key(|e| e.key);
                index.clear();
                index.extend(entries.iter().enumerate().map(|(i, e)| (e.key, i)));
            }
        }
    }

    fn into_entries(self) -> Vec<Entry<V>> {
        match self {
            Self::Single(entries) => entries.into_iter().collect(),
            Self::Small(entries) => entries.into_iter().collect(),
            Self::Array(entries) | Self::Sorted(entries) => entries,
            Self::Hash { entries, .. } => entries,
        }
    }

    /// Rebuilds a store of `tier` from `entries`, falling back to the array
    /// tier when they do not fit inline.
    fn with_entries(tier: Tier, mut entries: Vec<Entry<V>>) -> Self {
        match tier {
            Tier::Single if entries.len() <= 1 => Self::Single(entries.into_iter().collect()),
            Tier::Small if entries.len() <= SMALL => Self::Small(entries.into_iter().collect()),
            Tier::Sorted => {
                entries.sort_unstable_by_key(|e| e.key);
                Self::Sorted(entries)
            }
            Tier::Hash => {
                let index = entries.iter().enumerate().map(|(i, e)| (e.key, i)).collect();
                Self::Hash { entries, index }
            }
            _ => Self::Array(entries),
        }
    }

    /// Moves every entry into a fresh store of the target tier.
    ///
    /// On failure the original entries come back in a store of the original
    /// tier alongside the error.
    fn promote(self, target: Tier) -> Result<Self, (Self, SlotMapError)> {
        let from = self.tier();
        let len = self.entries().len();
        let too_small = SlotMapError::PromotionTargetTooSmall {
            from: from.into(),
            to: target.into(),
            len,
        };
        if target.capacity() <= len {
            return Err((self, too_small));
        }
        let Some(mut promoted) = Self::empty(target) else {
            return Err((self, too_small));
        };
        let mut entries = self.into_entries().into_iter();
        while let Some(entry) = entries.next() {
            if let Inserted::Promote(_, entry) = promoted.insert(entry) {
                let mut restored = promoted.into_entries();
                restored.push(entry);
                restored.extend(entries);
                return Err((Self::with_entries(from, restored), too_small));
            }
        }
        Ok(promoted)
    }
}

/// Sparse map from small integer keys to values with tiered storage.
#[derive(Clone, Debug)]
pub struct SparseSlotMap<V> {
    store: Option<Store<V>>,
}

impl<V> SparseSlotMap<V> {
    pub const fn new() -> Self {
        Self { store: None }
    }

    /// Inserts or replaces the value for `key`, promoting storage as needed.
    ///
    /// A failed promotion leaves the map exactly as it was.
    pub fn insert(&mut self, key: u32, value: V) -> Result<(), SlotMapError> {
        let mut pending = Entry { key, value };
        loop {
            let store = self
                .store
                .get_or_insert_with(|| Store::Single(ArrayVec::new()));
            match store.insert(pending) {
                Inserted::Stored => return Ok(()),
                Inserted::Promote(target, entry) => {
                    self.promote_to(target)?;
                    pending = entry;
                }
            }
        }
    }

    fn promote_to(&mut self, target: Tier) -> Result<(), SlotMapError> {
        let Some(store) = self.store.take() else {
            self.store = Store::empty(target);
            return Ok(());
        };
        match store.promote(target) {
            Ok(promoted) => {
                self.store = Some(promoted);
                Ok(())
            }
            Err((original, error)) => {
                self.store = (!original.entries().is_empty()).then_some(original);
                Err(error)
            }
        }
    }

    pub fn get(&self, key: u32) -> Option<&V> {
        let store = self.store.as_ref()?;
        let position = store.position(key)?;
        store.entries().get(position).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, key: u32) -> Option<&mut V> {
        let store = self.store.as_mut()?;
        let position = store.position(key)?;
        store.value_at_mut(position)
    }

    pub fn contains_key(&self, key: u32) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key`. The storage tier is kept unless the map becomes empty.
    pub fn remove(&mut self, key: u32) -> Option<V> {
        let store = self.store.as_mut()?;
        let removed = store.remove(key);
        if store.entries().is_empty() {
            self.store = None;
        }
        removed
    }

    /// Returns the entry at `index` in the map's current iteration order.
    pub fn get_at(&self, index: usize) -> Result<(u32, &V), SlotMapError> {
        self.entries()
            .get(index)
            .map(|e| (e.key, &e.value))
            .ok_or(SlotMapError::IndexOutOfRange {
                index,
                len: self.len(),
            })
    }

    /// Orders entries by key. Later insertions may break the order again.
    pub fn sort(&mut self) {
        if let Some(store) = self.store.as_mut() {
            store.sort();
        }
    }

    pub fn entries(&self) -> &[Entry<V>] {
        self.store.as_ref().map(Store::entries).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &V)> {
        self.entries().iter().map(|e| (e.key, &e.value))
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries().iter().map(|e| &e.value)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tier(&self) -> Tier {
        self.store.as_ref().map_or(Tier::Empty, Store::tier)
    }
}

impl<V> Default for SparseSlotMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Always-sorted slot map, used where lookups vastly outnumber insertions.
#[derive(Clone, Debug)]
pub struct SortedSlotMap<V> {
    entries: Vec<Entry<V>>,
}

impl<V> SortedSlotMap<V> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Inserts or replaces; returns the previous value for `key`.
    pub fn insert(&mut self, key: u32, value: V) -> Option<V> {
        match self.entries.binary_search_by_key(&key, |e| e.key) {
            Ok(at) => Some(std::mem::replace(&mut self.entries[at].value, value)),
            Err(at) => {
                self.entries.insert(at, Entry { key, value });
                None
            }
        }
    }

    pub fn get(&self, key: u32) -> Option<&V> {
        self.entries
            .binary_search_by_key(&key, |e| e.key)
            .ok()
            .map(|at| &self.entries[at].value)
    }

    pub fn contains_key(&self, key: u32) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &V)> {
        self.entries.iter().map(|e| (e.key, &e.value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for SortedSlotMap<V> {
    fn default() -> Self {
        Self::new()
    }
}
