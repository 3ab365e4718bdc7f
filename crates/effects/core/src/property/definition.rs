use std::any::{Any, type_name};
use std::fmt;
use std::sync::{Arc, Mutex};

use super::metadata::{PropertyMetadata, SealedMetadata, ValidateCallback};
use super::registry::{ErasedProperty, PropertyKey, PropertyRegistry};
use super::PropertyValue;
use crate::entity::DynamicEntity;
use crate::error::{CoreError, PropertyError};
use crate::snapshot;
use crate::sparse::SortedSlotMap;
use crate::sync::{lock, sync_root};
use crate::types::{EntityTypeEntry, TypeRegistry, TypeToken};

/// A named, typed property owned by an entity type.
pub struct PropertyDefinition<T: PropertyValue> {
    name: String,
    owner: TypeToken,
    owner_entry: Arc<EntityTypeEntry>,
    global_index: u16,
    default_metadata: Arc<SealedMetadata<T>>,
    validator: Option<ValidateCallback<T>>,
    overrides: Mutex<SortedSlotMap<Arc<SealedMetadata<T>>>>,
}

impl<T: PropertyValue> PropertyDefinition<T> {
    /// Registers a property with no metadata and no validator.
    pub fn register(name: &str, owner: TypeToken) -> Result<Arc<Self>, PropertyError> {
        Self::register_with(name, owner, None, None)
    }

    /// Registers a property.
    ///
    /// The default value comes from `metadata` when it sets one, otherwise
    /// from `T::default()`, and must satisfy `validator`. When `metadata` is
    /// given it also becomes the owner type's override.
    pub fn register_with(
        name: &str,
        owner: TypeToken,
        metadata: Option<PropertyMetadata<T>>,
        validator: Option<ValidateCallback<T>>,
    ) -> Result<Arc<Self>, PropertyError> {
        if name.is_empty() {
            return Err(PropertyError::EmptyName);
        }

        let _sync = sync_root().enter();
        let owner_entry = TypeRegistry::global().resolve(owner)?;
        let registry = PropertyRegistry::global();
        let key = PropertyKey::new(owner.name(), name);
        if registry.contains(&key) {
            return Err(PropertyError::AlreadyRegistered {
                owner: owner.name(),
                name: name.to_owned(),
            });
        }

        let default_value = metadata
            .as_ref()
            .and_then(|m| m.default_value().cloned())
            .unwrap_or_default();
        if let Some(validate) = &validator
            && !validate(&default_value)
        {
            return Err(PropertyError::InvalidDefaultValue {
                owner: owner.name(),
                name: name.to_owned(),
            });
        }
        let default_metadata = Arc::new(SealedMetadata::with_default(default_value));

        let mut overrides = SortedSlotMap::new();
        if let Some(metadata) = metadata {
            overrides.insert(owner_entry.id(), Arc::new(metadata.merge(&default_metadata)));
        }

        let global_index = registry.reserve_index().ok_or_else(|| PropertyError::LimitExceeded {
            owner: owner.name(),
            name: name.to_owned(),
        })?;

        let property = Arc::new(Self {
            name: name.to_owned(),
            owner,
            owner_entry,
            global_index,
            default_metadata,
            validator,
            overrides: Mutex::new(overrides),
        });
        registry.insert(key, Arc::clone(&property) as Arc<dyn ErasedProperty>);

        tracing::debug!(
            target: "effects::property",
            owner = owner.name(),
            name,
            index = global_index,
            value_type = type_name::<T>(),
            "registered property"
        );
        Ok(property)
    }

    /// Specializes metadata for `for_type`, which must be the owner or derive from it.
    ///
    /// Unset fields are inherited from the metadata in effect for the type's
    /// base; change callbacks chain after the base's.
    pub fn override_metadata(
        &self,
        for_type: TypeToken,
        metadata: PropertyMetadata<T>,
    ) -> Result<(), PropertyError> {
        let _sync = sync_root().enter();
        let entry = TypeRegistry::global().resolve(for_type)?;
        if !entry.is_instance_of(&self.owner_entry) {
            return Err(PropertyError::IncompatibleOverride {
                owner: self.owner.name(),
                name: self.name.clone(),
                for_type: for_type.name(),
            });
        }
        if let Some(default_value) = metadata.default_value()
            && !self.is_valid_value(default_value)
        {
            return Err(PropertyError::InvalidDefaultValue {
                owner: self.owner.name(),
                name: self.name.clone(),
            });
        }
        if lock(&self.overrides).contains_key(entry.id()) {
            return Err(PropertyError::MetadataAlreadyRegistered {
                name: self.name.clone(),
                for_type: for_type.name(),
            });
        }

        let base = match entry.base() {
            Some(base) => self.metadata(base),
            None => Arc::clone(&self.default_metadata),
        };
        let sealed = Arc::new(metadata.merge(&base));
        lock(&self.overrides).insert(entry.id(), sealed);

        tracing::debug!(
            target: "effects::property",
            owner = self.owner.name(),
            name = %self.name,
            for_type = for_type.name(),
            "overrode property metadata"
        );
        Ok(())
    }

    /// Returns the metadata in effect for `entry`: the override of the nearest
    /// ancestor-or-self, or the default metadata.
    pub fn metadata(&self, entry: &EntityTypeEntry) -> Arc<SealedMetadata<T>> {
        let overrides = lock(&self.overrides);
        entry
            .self_and_ancestors()
            .find_map(|candidate| overrides.get(candidate.id()))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_metadata))
    }

    pub fn default_metadata(&self) -> &Arc<SealedMetadata<T>> {
        &self.default_metadata
    }

    pub fn is_valid_value(&self, value: &T) -> bool {
        self.validator.as_ref().is_none_or(|validate| validate(value))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> TypeToken {
        self.owner
    }

    pub fn owner_entry(&self) -> &Arc<EntityTypeEntry> {
        &self.owner_entry
    }

    pub fn global_index(&self) -> u16 {
        self.global_index
    }
}

impl<T: PropertyValue> ErasedProperty for PropertyDefinition<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> TypeToken {
        self.owner
    }

    fn global_index(&self) -> u16 {
        self.global_index
    }

    fn value_type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn restore_base_value(
        self: Arc<Self>,
        entity: &DynamicEntity,
        encoded: &[u8],
    ) -> Result<(), CoreError> {
        let value: T = snapshot::decode_value(&self.name, encoded)?;
        entity.set_base_value(&self, value)
    }

    fn copy_base_value(
        self: Arc<Self>,
        from: &DynamicEntity,
        to: &DynamicEntity,
    ) -> Result<(), CoreError> {
        let value = from.base_value(&self)?;
        to.set_base_value(&self, value)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<T: PropertyValue> fmt::Debug for PropertyDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDefinition")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("global_index", &self.global_index)
            .field("value_type", &type_name::<T>())
            .finish()
    }
}
