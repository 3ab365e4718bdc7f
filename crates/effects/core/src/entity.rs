//! Entities carrying dynamic property values.
//!
//! A [`DynamicEntity`] is a cheap, clonable handle. Its value map holds one
//! [`PropertyCell`] per property that has ever been read or written on it,
//! keyed by the property's global index. Cells are created lazily.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use serde::{Deserialize, Serialize};

use crate::cell::{ErasedCell, PropertyCell};
use crate::error::{CoreError, RegistryError};
use crate::property::{PropertyDefinition, PropertyRegistry, PropertyValue};
use crate::snapshot::{EntitySnapshot, PropertyRecord};
use crate::sparse::SparseSlotMap;
use crate::sync::{lock, sync_root};
use crate::types::{EntityType, EntityTypeEntry, TypeRegistry, TypeToken};

/// Process-unique entity identifier.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EntityId(pub u64);

impl EntityId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct EntityInner {
    id: EntityId,
    token: TypeToken,
    entry: OnceLock<Arc<EntityTypeEntry>>,
    values: Mutex<SparseSlotMap<Arc<dyn ErasedCell>>>,
}

/// Handle to an entity with dynamic properties. Clones share the same entity.
#[derive(Clone)]
pub struct DynamicEntity {
    inner: Arc<EntityInner>,
}

impl DynamicEntity {
    /// Creates an entity of kind `E` with a fresh id.
    pub fn new<E: EntityType>() -> Self {
        Self::with_type(TypeToken::of::<E>())
    }

    /// Creates an entity from a runtime type token.
    pub fn with_type(token: TypeToken) -> Self {
        Self {
            inner: Arc::new(EntityInner {
                id: EntityId::next(),
                token,
                entry: OnceLock::new(),
                values: Mutex::new(SparseSlotMap::new()),
            }),
        }
    }

    /// Process-unique identity, shared by every clone of this handle.
    pub fn id(&self) -> EntityId {
        self.inner.id
    }

    /// The kind this entity was created with. Does not touch the registry.
    pub fn type_token(&self) -> TypeToken {
        self.inner.token
    }

    /// Registry entry of this entity's type, resolved on first use.
    pub fn entity_type(&self) -> Result<Arc<EntityTypeEntry>, RegistryError> {
        if let Some(entry) = self.inner.entry.get() {
            return Ok(Arc::clone(entry));
        }
        let entry = TypeRegistry::global().resolve(self.inner.token)?;
        Ok(Arc::clone(self.inner.entry.get_or_init(|| entry)))
    }

    /// True if this entity's type is `E` or derives from it.
    pub fn is_instance_of<E: EntityType>(&self) -> Result<bool, RegistryError> {
        let query = TypeRegistry::global().resolve_type::<E>()?;
        Ok(self.entity_type()?.is_instance_of(&query))
    }

    /// Weak handle that does not keep the entity alive.
    pub fn downgrade(&self) -> WeakEntity {
        WeakEntity {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ========================================================================
    // Cells
    // ========================================================================

    /// Returns the cell for `property`, creating it on first access.
    pub fn get_value<T: PropertyValue>(
        &self,
        property: &Arc<PropertyDefinition<T>>,
    ) -> Result<Arc<PropertyCell<T>>, CoreError> {
        let _sync = sync_root().enter();
        if let Some(cell) = self.existing_value(property)? {
            return Ok(cell);
        }

        let entry = self.entity_type()?;
        let metadata = property.metadata(&entry);
        let cell = PropertyCell::new(Arc::clone(property), metadata, self.downgrade());
        lock(&self.inner.values).insert(
            u32::from(property.global_index()),
            Arc::clone(&cell) as Arc<dyn ErasedCell>,
        )?;

        tracing::trace!(
            target: "effects::entity",
            entity = %self,
            property = property.name(),
            "created value cell"
        );
        Ok(cell)
    }

    /// Returns the cell for `property` only if it already exists.
    pub fn existing_value<T: PropertyValue>(
        &self,
        property: &PropertyDefinition<T>,
    ) -> Result<Option<Arc<PropertyCell<T>>>, CoreError> {
        let erased = lock(&self.inner.values)
            .get(u32::from(property.global_index()))
            .cloned();
        erased
            .map(|cell| {
                cell.as_any()
                    .downcast::<PropertyCell<T>>()
                    .map_err(|_| CoreError::TypeMismatch {
                        property: property.name().to_owned(),
                    })
            })
            .transpose()
    }

    /// Base value of `property`, creating the cell if needed.
    pub fn base_value<T: PropertyValue>(
        &self,
        property: &Arc<PropertyDefinition<T>>,
    ) -> Result<T, CoreError> {
        Ok(self.get_value(property)?.base_value())
    }

    /// Effective value of `property` after modifiers.
    pub fn current_value<T: PropertyValue>(
        &self,
        property: &Arc<PropertyDefinition<T>>,
    ) -> Result<T, CoreError> {
        Ok(self.get_value(property)?.current_value()?)
    }

    /// Replaces the base value of `property` and recomputes its cell.
    pub fn set_base_value<T: PropertyValue>(
        &self,
        property: &Arc<PropertyDefinition<T>>,
        value: T,
    ) -> Result<(), CoreError> {
        Ok(self.get_value(property)?.set_base_value(value)?)
    }

    /// Clears an existing cell back to the metadata default.
    pub fn clear_value<T: PropertyValue>(
        &self,
        property: &PropertyDefinition<T>,
    ) -> Result<(), CoreError> {
        if let Some(cell) = self.existing_value(property)? {
            cell.clear_value()?;
        }
        Ok(())
    }

    /// Forces an existing cell to re-derive its effective value.
    pub fn invalidate_property<T: PropertyValue>(
        &self,
        property: &PropertyDefinition<T>,
    ) -> Result<(), CoreError> {
        let _sync = sync_root().enter();
        if let Some(cell) = self.existing_value(property)? {
            cell.invalidate()?;
        }
        Ok(())
    }

    /// Number of materialized cells.
    pub fn property_count(&self) -> usize {
        lock(&self.inner.values).len()
    }

    fn cells(&self) -> Vec<Arc<dyn ErasedCell>> {
        let mut values = lock(&self.inner.values);
        values.sort();
        values.values().cloned().collect()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Captures the base value of every materialized cell.
    pub fn snapshot(&self) -> Result<EntitySnapshot, CoreError> {
        let _sync = sync_root().enter();
        let properties = self
            .cells()
            .into_iter()
            .map(|cell| {
                let property = cell.property();
                Ok(PropertyRecord {
                    owner: property.owner().name().to_owned(),
                    name: property.name().to_owned(),
                    base_value: cell.encode_base_value()?,
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;
        Ok(EntitySnapshot { properties })
    }

    /// Writes each recorded base value back. Records naming properties that are
    /// not registered in this process are skipped.
    ///
    /// Returns the number of properties restored.
    pub fn restore(&self, snapshot: &EntitySnapshot) -> Result<usize, CoreError> {
        let _sync = sync_root().enter();
        let registry = PropertyRegistry::global();
        let mut restored = 0;
        for record in &snapshot.properties {
            let Some(property) = registry.find(&record.owner, &record.name) else {
                tracing::warn!(
                    target: "effects::entity",
                    entity = %self,
                    owner = %record.owner,
                    name = %record.name,
                    "skipping unknown property in snapshot"
                );
                continue;
            };
            property.restore_base_value(self, &record.base_value)?;
            restored += 1;
        }
        tracing::debug!(
            target: "effects::entity",
            entity = %self,
            restored,
            skipped = snapshot.properties.len() - restored,
            "restored entity snapshot"
        );
        Ok(restored)
    }

    /// Copies every base value materialized on `source` onto this entity.
    pub fn clone_values_from(&self, source: &DynamicEntity) -> Result<(), CoreError> {
        let _sync = sync_root().enter();
        for cell in source.cells() {
            cell.property().copy_base_value(source, self)?;
        }
        Ok(())
    }

    /// Re-derives every materialized cell.
    pub fn invalidate_all(&self) -> Result<(), CoreError> {
        let _sync = sync_root().enter();
        for cell in self.cells() {
            cell.invalidate()?;
        }
        Ok(())
    }
}

impl PartialEq for DynamicEntity {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for DynamicEntity {}

impl Hash for DynamicEntity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Display for DynamicEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.inner.token.name(), self.inner.id)
    }
}

impl fmt::Debug for DynamicEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicEntity")
            .field("id", &self.inner.id)
            .field("type", &self.inner.token)
            .finish()
    }
}

/// Non-owning handle to a [`DynamicEntity`].
#[derive(Clone)]
pub struct WeakEntity {
    inner: Weak<EntityInner>,
}

impl WeakEntity {
    /// Returns the entity if any strong handle is still alive.
    pub fn upgrade(&self) -> Option<DynamicEntity> {
        self.inner.upgrade().map(|inner| DynamicEntity { inner })
    }
}

impl fmt::Debug for WeakEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(entity) => write!(f, "WeakEntity({entity})"),
            None => f.write_str("WeakEntity(dropped)"),
        }
    }
}
