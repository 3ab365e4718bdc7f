//! Per-type property metadata.
//!
//! [`PropertyMetadata`] is the mutable builder callers hand to registration
//! and overrides. Once merged with its base it becomes an immutable
//! [`SealedMetadata`], which is what cells hold on to.

use std::fmt;
use std::sync::Arc;

use super::{PropertyDefinition, PropertyValue};
use crate::entity::DynamicEntity;

/// Outcome of a coercion callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Coercion<T> {
    /// Use this value as the effective value.
    Value(T),
    /// Keep the uncoerced value.
    Revert,
}

/// Arguments passed to property change callbacks.
#[derive(Clone)]
pub struct PropertyChangedArgs<T: PropertyValue> {
    pub property: Arc<PropertyDefinition<T>>,
    pub old_value: T,
    pub new_value: T,
}

impl<T: PropertyValue> fmt::Debug for PropertyChangedArgs<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyChangedArgs")
            .field("property", &self.property.name())
            .field("old_value", &self.old_value)
            .field("new_value", &self.new_value)
            .finish()
    }
}

pub type ChangedCallback<T> =
    Arc<dyn Fn(&DynamicEntity, &PropertyChangedArgs<T>) + Send + Sync>;
pub type CoerceCallback<T> = Arc<dyn Fn(&DynamicEntity, &T) -> Coercion<T> + Send + Sync>;
pub type ValidateCallback<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Unsealed metadata supplied at registration or override time.
pub struct PropertyMetadata<T: PropertyValue> {
    default_value: Option<T>,
    changed: Option<ChangedCallback<T>>,
    coerce: Option<CoerceCallback<T>>,
}

impl<T: PropertyValue> PropertyMetadata<T> {
    pub fn new() -> Self {
        Self {
            default_value: None,
            changed: None,
            coerce: None,
        }
    }

    pub fn with_default(mut self, value: T) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn on_changed(
        mut self,
        callback: impl Fn(&DynamicEntity, &PropertyChangedArgs<T>) + Send + Sync + 'static,
    ) -> Self {
        self.changed = Some(Arc::new(callback));
        self
    }

    pub fn coerce_with(
        mut self,
        callback: impl Fn(&DynamicEntity, &T) -> Coercion<T> + Send + Sync + 'static,
    ) -> Self {
        self.coerce = Some(Arc::new(callback));
        self
    }

    pub fn default_value(&self) -> Option<&T> {
        self.default_value.as_ref()
    }

    /// Fills unset fields from `base` and freezes the result.
    ///
    /// Change callbacks chain with the base's running first; an unset default
    /// or coercion callback is inherited.
    pub(crate) fn merge(self, base: &SealedMetadata<T>) -> SealedMetadata<T> {
        let mut changed = base.changed.clone();
        changed.extend(self.changed);
        SealedMetadata {
            default_value: self
                .default_value
                .unwrap_or_else(|| base.default_value.clone()),
            changed,
            coerce: self.coerce.or_else(|| base.coerce.clone()),
        }
    }
}

impl<T: PropertyValue> Default for PropertyMetadata<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable metadata in effect for one entity type.
pub struct SealedMetadata<T: PropertyValue> {
    default_value: T,
    changed: Vec<ChangedCallback<T>>,
    coerce: Option<CoerceCallback<T>>,
}

impl<T: PropertyValue> SealedMetadata<T> {
    pub(crate) fn with_default(default_value: T) -> Self {
        Self {
            default_value,
            changed: Vec::new(),
            coerce: None,
        }
    }

    pub fn default_value(&self) -> &T {
        &self.default_value
    }

    pub fn changed_callbacks(&self) -> &[ChangedCallback<T>] {
        &self.changed
    }

    pub fn coerce_callback(&self) -> Option<&CoerceCallback<T>> {
        self.coerce.as_ref()
    }

    pub fn uses_coercion(&self) -> bool {
        self.coerce.is_some()
    }
}

impl<T: PropertyValue> fmt::Debug for SealedMetadata<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedMetadata")
            .field("default_value", &self.default_value)
            .field("changed_callbacks", &self.changed.len())
            .field("uses_coercion", &self.uses_coercion())
            .finish()
    }
}
