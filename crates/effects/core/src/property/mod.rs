//! Property definitions and their per-type metadata.
//!
//! A [`PropertyDefinition`] is registered once per (owner type, name) and
//! receives a dense global index used as the key in every entity's value map.
//! Metadata can be specialized for any type deriving from the owner; lookups
//! resolve to the override of the nearest ancestor-or-self.

mod definition;
mod metadata;
mod registry;

use std::fmt::Debug;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use definition::PropertyDefinition;
pub use metadata::{
    ChangedCallback, CoerceCallback, Coercion, PropertyChangedArgs, PropertyMetadata,
    SealedMetadata, ValidateCallback,
};
pub use registry::{ErasedProperty, PropertyKey, PropertyRegistry};

/// Bound satisfied by every type that can be stored in a property.
///
/// Equality decides whether a recomputed value counts as a change; the
/// [`Default`] value is used when no metadata default is supplied.
pub trait PropertyValue:
    Clone + PartialEq + Default + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> PropertyValue for T where
    T: Clone + PartialEq + Default + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}
