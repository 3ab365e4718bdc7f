use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex};

use super::{PropertyDefinition, PropertyValue};
use crate::config::SystemConfig;
use crate::entity::DynamicEntity;
use crate::error::CoreError;
use crate::sync::lock;
use crate::types::TypeToken;

/// Type-erased view of a [`PropertyDefinition`].
///
/// Used wherever properties are handled without knowing their value type,
/// such as snapshot restore and whole-entity copies.
pub trait ErasedProperty: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn owner(&self) -> TypeToken;

    fn global_index(&self) -> u16;

    fn value_type_name(&self) -> &'static str;

    /// Decodes a snapshot value and writes it as the entity's base value.
    fn restore_base_value(
        self: Arc<Self>,
        entity: &DynamicEntity,
        encoded: &[u8],
    ) -> Result<(), CoreError>;

    /// Copies the base value of this property from one entity to another.
    fn copy_base_value(
        self: Arc<Self>,
        from: &DynamicEntity,
        to: &DynamicEntity,
    ) -> Result<(), CoreError>;

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Lookup key: (owner type name, property name).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PropertyKey {
    pub owner: String,
    pub name: String,
}

impl PropertyKey {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

#[derive(Default)]
struct RegistryState {
    by_key: HashMap<PropertyKey, Arc<dyn ErasedProperty>>,
    next_index: usize,
}

/// Process-wide table of registered properties.
pub struct PropertyRegistry {
    state: Mutex<RegistryState>,
}

impl PropertyRegistry {
    pub fn global() -> &'static PropertyRegistry {
        static GLOBAL: LazyLock<PropertyRegistry> = LazyLock::new(|| PropertyRegistry {
            state: Mutex::new(RegistryState::default()),
        });
        &GLOBAL
    }

    pub fn find(&self, owner: &str, name: &str) -> Option<Arc<dyn ErasedProperty>> {
        lock(&self.state)
            .by_key
            .get(&PropertyKey::new(owner, name))
            .cloned()
    }

    /// Finds a property and recovers its value type.
    pub fn find_typed<T: PropertyValue>(
        &self,
        owner: &str,
        name: &str,
    ) -> Option<Arc<PropertyDefinition<T>>> {
        self.find(owner, name)?
            .as_any()
            .downcast::<PropertyDefinition<T>>()
            .ok()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn contains(&self, key: &PropertyKey) -> bool {
        lock(&self.state).by_key.contains_key(key)
    }

    pub(crate) fn insert(&self, key: PropertyKey, property: Arc<dyn ErasedProperty>) {
        lock(&self.state).by_key.insert(key, property);
    }

    /// Claims the next global index, or `None` once the limit is reached.
    pub(crate) fn reserve_index(&self) -> Option<u16> {
        let mut state = lock(&self.state);
        if state.next_index >= SystemConfig::MAX_PROPERTIES {
            return None;
        }
        let index = u16::try_from(state.next_index).ok()?;
        state.next_index += 1;
        Some(index)
    }
}
