//! Entity type hierarchy.
//!
//! Entity kinds are zero-sized marker types implementing [`EntityType`]. Each
//! names its base type, forming a single-inheritance chain rooted at
//! [`Entity`]. The [`TypeRegistry`] assigns every kind a dense numeric id the
//! first time it is seen, always after its base, so ids grow from root to leaf.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock, Mutex};

use crate::error::RegistryError;
use crate::sync::{lock, sync_root};

/// Upper bound on base-chain length; longer chains are reported as cycles.
const MAX_HIERARCHY_DEPTH: usize = 64;

/// Marker trait for entity kinds that can carry dynamic properties.
///
/// ```
/// use effects_core::{Entity, EntityType};
///
/// struct Colony;
/// impl EntityType for Colony {
///     const NAME: &'static str = "Colony";
///     type Base = Entity;
/// }
/// ```
pub trait EntityType: 'static {
    /// Unique, stable name. Used as the owner key in snapshots.
    const NAME: &'static str;

    /// Immediate base type. The root type names itself.
    type Base: EntityType;
}

/// Root of every entity type hierarchy.
#[derive(Debug)]
pub struct Entity;

impl EntityType for Entity {
    const NAME: &'static str = "Entity";
    type Base = Entity;
}

/// Runtime handle for an [`EntityType`].
#[derive(Clone, Copy)]
pub struct TypeToken {
    type_id: TypeId,
    name: &'static str,
    base: fn() -> TypeToken,
}

impl TypeToken {
    pub fn of<E: EntityType>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            name: E::NAME,
            base: TypeToken::of::<E::Base>,
        }
    }

    pub fn root() -> Self {
        Self::of::<Entity>()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn is_root(&self) -> bool {
        self.type_id == TypeId::of::<Entity>()
    }

    /// Returns the base type, or `None` for a type that names itself as base.
    pub fn base(&self) -> Option<TypeToken> {
        let base = (self.base)();
        (base.type_id != self.type_id).then_some(base)
    }
}

impl PartialEq for TypeToken {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for TypeToken {}

impl Hash for TypeToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Registry record for one entity type.
#[derive(Debug)]
pub struct EntityTypeEntry {
    id: u32,
    token: TypeToken,
    base: Option<Arc<EntityTypeEntry>>,
}

impl EntityTypeEntry {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.token.name
    }

    pub fn token(&self) -> TypeToken {
        self.token
    }

    pub fn base(&self) -> Option<&Arc<EntityTypeEntry>> {
        self.base.as_ref()
    }

    /// Iterates this type followed by each of its bases up to the root.
    pub fn self_and_ancestors(&self) -> impl Iterator<Item = &EntityTypeEntry> {
        std::iter::successors(Some(self), |entry| entry.base.as_deref())
    }

    /// True if `self` is `other` or derives from it.
    pub fn is_instance_of(&self, other: &EntityTypeEntry) -> bool {
        self.self_and_ancestors().any(|entry| entry.id == other.id)
    }

    /// True if `self` strictly derives from `other`.
    pub fn is_subclass_of(&self, other: &EntityTypeEntry) -> bool {
        self.self_and_ancestors()
            .skip(1)
            .any(|entry| entry.id == other.id)
    }
}

#[derive(Default)]
struct RegistryState {
    by_type: HashMap<TypeId, Arc<EntityTypeEntry>>,
    by_name: HashMap<&'static str, TypeId>,
    next_id: u32,
}

/// Maps entity kinds to lazily assigned [`EntityTypeEntry`] records.
#[derive(Default)]
pub struct TypeRegistry {
    state: Mutex<RegistryState>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every entity and property in the process.
    pub fn global() -> &'static TypeRegistry {
        static GLOBAL: LazyLock<TypeRegistry> = LazyLock::new(TypeRegistry::new);
        &GLOBAL
    }

    /// Returns the entry for `token`, registering it and its bases on first use.
    pub fn resolve(&self, token: TypeToken) -> Result<Arc<EntityTypeEntry>, RegistryError> {
        let _sync = sync_root().enter();
        let mut state = lock(&self.state);
        state.resolve(token, 0)
    }

    pub fn resolve_type<E: EntityType>(&self) -> Result<Arc<EntityTypeEntry>, RegistryError> {
        self.resolve(TypeToken::of::<E>())
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<EntityTypeEntry>> {
        let state = lock(&self.state);
        let type_id = state.by_name.get(name)?;
        state.by_type.get(type_id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RegistryState {
    fn resolve(
        &mut self,
        token: TypeToken,
        depth: usize,
    ) -> Result<Arc<EntityTypeEntry>, RegistryError> {
        if let Some(entry) = self.by_type.get(&token.type_id) {
            return Ok(Arc::clone(entry));
        }
        if depth > MAX_HIERARCHY_DEPTH {
            return Err(RegistryError::CyclicHierarchy {
                type_name: token.name,
            });
        }
        if self.by_name.contains_key(token.name) {
            return Err(RegistryError::DuplicateTypeName { name: token.name });
        }

        let base = match token.base() {
            Some(base) => Some(self.resolve(base, depth + 1)?),
            None if token.is_root() => None,
            None => {
                return Err(RegistryError::DetachedHierarchy {
                    type_name: token.name,
                });
            }
        };

        let entry = Arc::new(EntityTypeEntry {
            id: self.next_id,
            token,
            base,
        });
        self.next_id += 1;
        self.by_type.insert(token.type_id, Arc::clone(&entry));
        self.by_name.insert(token.name, token.type_id);

        tracing::trace!(
            target: "effects::types",
            name = token.name,
            id = entry.id,
            "registered entity type"
        );
        Ok(entry)
    }
}
