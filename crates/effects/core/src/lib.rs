//! Dynamic, modifiable properties for game entities.
//!
//! Entities declare typed properties at registration time and store one value
//! cell per property they actually use. Each cell folds an ordered list of
//! [`Modifier`]s over its base value and caches the result until something it
//! depends on changes.
//!
//! Modules are organized by responsibility:
//! - [`types`] resolves the entity type hierarchy
//! - [`property`] holds property definitions and per-type metadata
//! - [`cell`] stores and derives one property's value on one entity
//! - [`modifier`] defines the value transformations folded into cells
//! - [`entity`] exposes the entity handle and its persistence
//! - [`sparse`] provides the frugal storage behind entity value maps
//! - [`sync`] hosts the process-wide lock shared with the effect engine
pub mod cell;
pub mod config;
pub mod entity;
pub mod error;
pub mod modifier;
pub mod observe;
pub mod property;
pub mod snapshot;
pub mod sparse;
pub mod sync;
pub mod types;

pub use cell::{CellFlags, PropertyCell};
pub use config::SystemConfig;
pub use entity::{DynamicEntity, EntityId, WeakEntity};
pub use error::{
    CellError, CoreError, EffectsError, ErrorSeverity, PropertyError, RegistryError, Result,
    SlotMapError, SnapshotError,
};
pub use modifier::{Modifier, ModifierId, ModifierSuspension, StackingKey, ValueModifier};
pub use observe::{Handler, Handlers, SubscriptionId};
pub use property::{
    Coercion, ErasedProperty, PropertyChangedArgs, PropertyDefinition, PropertyKey,
    PropertyMetadata, PropertyRegistry, PropertyValue, SealedMetadata, ValidateCallback,
};
pub use snapshot::{EntitySnapshot, PropertyRecord};
pub use sparse::{SortedSlotMap, SparseSlotMap, Tier};
pub use sync::{SyncGuard, SyncRoot, lock, sync_root};
pub use types::{Entity, EntityType, EntityTypeEntry, TypeRegistry, TypeToken};
