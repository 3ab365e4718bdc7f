//! Per-entity property value cells.
//!
//! A [`PropertyCell`] stores one property's value for one entity. It keeps the
//! base value, the ordered modifiers applied on top of it, and the cached
//! effective value, which is recomputed when the base value, a modifier, or
//! the coercion input changes.
//!
//! The effective value is derived in three stages:
//!
//! 1. **base**: the explicitly set value, or the metadata default when unset
//! 2. **computed**: the base folded through every modifier in attachment order
//! 3. **coerced**: the computed value passed through the metadata coercion
//!
//! Cells without modifiers or coercion store the base value directly; the
//! record holding computed and coerced values is allocated only when needed.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use bitflags::bitflags;

use crate::config::SystemConfig;
use crate::entity::WeakEntity;
use crate::error::{CellError, SnapshotError};
use crate::modifier::Modifier;
use crate::observe::{Handlers, SubscriptionId};
use crate::property::{
    Coercion, ErasedProperty, PropertyChangedArgs, PropertyDefinition, PropertyValue,
    SealedMetadata,
};
use crate::snapshot;
use crate::sync::{lock, sync_root};

bitflags! {
    /// Derivation state of a cell.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct CellFlags: u8 {
        /// The coerced value is up to date.
        const COERCED = 1 << 0;
        /// The computed (modifier-folded) value is up to date.
        const COMPUTED = 1 << 1;
        /// The value is being recomputed.
        const UPDATING = 1 << 2;
        /// At least one modifier is attached.
        const HAS_MODIFIERS = 1 << 3;
        /// The coerced value was derived from a computed value.
        const COERCED_WITH_COMPUTED = 1 << 4;
        /// The metadata in effect has a coercion callback.
        const USES_COERCION = 1 << 5;
    }
}

struct ModifiedValue<T> {
    base: Option<T>,
    computed: Option<T>,
    coerced: Option<T>,
}

enum CellValue<T> {
    Unset,
    Base(T),
    Modified(Box<ModifiedValue<T>>),
}

impl<T: Clone> CellValue<T> {
    fn base_ref<'a>(&'a self, default: &'a T) -> &'a T {
        match self {
            Self::Unset => default,
            Self::Base(value) => value,
            Self::Modified(record) => record.base.as_ref().unwrap_or(default),
        }
    }

    fn computed(&self) -> Option<&T> {
        match self {
            Self::Modified(record) => record.computed.as_ref(),
            _ => None,
        }
    }

    fn coerced(&self) -> Option<&T> {
        match self {
            Self::Modified(record) => record.coerced.as_ref(),
            _ => None,
        }
    }

    /// Updates the derivation record, allocating it on first use.
    fn update_record(&mut self, update: impl FnOnce(&mut ModifiedValue<T>)) {
        let mut record = match std::mem::replace(self, Self::Unset) {
            Self::Modified(record) => record,
            Self::Base(value) => Box::new(ModifiedValue {
                base: Some(value),
                computed: None,
                coerced: None,
            }),
            Self::Unset => Box::new(ModifiedValue {
                base: None,
                computed: None,
                coerced: None,
            }),
        };
        update(&mut record);
        *self = Self::Modified(record);
    }

    fn clear_computed(&mut self) {
        if let Self::Modified(record) = self {
            record.computed = None;
        }
    }

    fn clear_coerced(&mut self) {
        if let Self::Modified(record) = self {
            record.coerced = None;
        }
    }

    /// Drops the derivation record, keeping only the base value.
    fn demote(&mut self) {
        if let Self::Modified(record) = self {
            *self = match record.base.take() {
                Some(value) => Self::Base(value),
                None => Self::Unset,
            };
        }
    }
}

struct AttachedModifier<T: PropertyValue> {
    modifier: Arc<Modifier<T>>,
    subscription: SubscriptionId,
}

struct CellState<T: PropertyValue> {
    value: CellValue<T>,
    flags: CellFlags,
    modifiers: Vec<AttachedModifier<T>>,
    current: Option<T>,
    valid: bool,
}

impl<T: PropertyValue> CellState<T> {
    fn cached_value(&self, default: &T) -> T {
        self.current
            .clone()
            .unwrap_or_else(|| self.value.base_ref(default).clone())
    }

    fn reset_coerced(&mut self) {
        if !self.flags.contains(CellFlags::COERCED) {
            return;
        }
        self.flags
            .remove(CellFlags::COERCED | CellFlags::COERCED_WITH_COMPUTED);
        if self.flags.contains(CellFlags::HAS_MODIFIERS) {
            self.value.clear_coerced();
        } else {
            self.flags.remove(CellFlags::COMPUTED);
            self.value.demote();
        }
    }

    fn modifier_snapshot(&self) -> Vec<Arc<Modifier<T>>> {
        self.modifiers
            .iter()
            .map(|attached| Arc::clone(&attached.modifier))
            .collect()
    }
}

struct Plan<T> {
    base: T,
    effective: T,
    fold: bool,
}

/// One property's value on one entity.
pub struct PropertyCell<T: PropertyValue> {
    this: Weak<PropertyCell<T>>,
    property: Arc<PropertyDefinition<T>>,
    metadata: Arc<SealedMetadata<T>>,
    owner: WeakEntity,
    state: Mutex<CellState<T>>,
    base_value_changed: Handlers<T>,
    current_value_changed: Handlers<PropertyChangedArgs<T>>,
}

impl<T: PropertyValue> PropertyCell<T> {
    pub(crate) fn new(
        property: Arc<PropertyDefinition<T>>,
        metadata: Arc<SealedMetadata<T>>,
        owner: WeakEntity,
    ) -> Arc<Self> {
        let mut flags = CellFlags::empty();
        flags.set(CellFlags::USES_COERCION, metadata.uses_coercion());
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            property,
            metadata,
            owner,
            state: Mutex::new(CellState {
                value: CellValue::Unset,
                flags,
                modifiers: Vec::new(),
                current: None,
                valid: false,
            }),
            base_value_changed: Handlers::new(),
            current_value_changed: Handlers::new(),
        })
    }

    pub fn property(&self) -> &Arc<PropertyDefinition<T>> {
        &self.property
    }

    pub fn metadata(&self) -> &Arc<SealedMetadata<T>> {
        &self.metadata
    }

    fn default_value(&self) -> &T {
        self.metadata.default_value()
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// The explicitly set value, or the metadata default when unset.
    pub fn base_value(&self) -> T {
        lock(&self.state)
            .value
            .base_ref(self.default_value())
            .clone()
    }

    /// Returns the effective value, recomputing it if invalidated.
    ///
    /// A read issued while this cell is recomputing (for example by one of its
    /// own modifiers) returns the last effective value instead of recursing.
    pub fn current_value(&self) -> Result<T, CellError> {
        let _sync = sync_root().enter();
        {
            let state = lock(&self.state);
            if state.valid || state.flags.contains(CellFlags::UPDATING) {
                return Ok(state.cached_value(self.default_value()));
            }
        }
        self.update_value()?;
        Ok(lock(&self.state).cached_value(self.default_value()))
    }

    /// Sets the base value and recomputes. Setting the current base value is a no-op.
    pub fn set_base_value(&self, value: T) -> Result<(), CellError> {
        let _sync = sync_root().enter();
        if !self.property.is_valid_value(&value) {
            return Err(CellError::InvalidValue {
                property: self.property.name().to_owned(),
            });
        }
        {
            let state = lock(&self.state);
            if state.flags.contains(CellFlags::UPDATING) {
                return Err(self.reentrant_write());
            }
            if *state.value.base_ref(self.default_value()) == value {
                return Ok(());
            }
        }
        self.reset_core(Some(value))
    }

    /// Returns the cell to the unset state so the metadata default applies again.
    pub fn clear_value(&self) -> Result<(), CellError> {
        let _sync = sync_root().enter();
        {
            let state = lock(&self.state);
            if state.flags.contains(CellFlags::UPDATING) {
                return Err(self.reentrant_write());
            }
            if matches!(state.value, CellValue::Unset) {
                return Ok(());
            }
        }
        self.reset_core(None)
    }

    fn reset_core(&self, base: Option<T>) -> Result<(), CellError> {
        {
            let mut state = lock(&self.state);
            if state.flags.contains(CellFlags::UPDATING) {
                return Err(self.reentrant_write());
            }
            state.value = match base {
                Some(value) => CellValue::Base(value),
                None => CellValue::Unset,
            };
            state.flags.remove(
                CellFlags::COMPUTED | CellFlags::COERCED | CellFlags::COERCED_WITH_COMPUTED,
            );
            state.valid = false;
        }

        let base_value = self.base_value();
        tracing::trace!(
            target: "effects::cell",
            property = self.property.name(),
            base = ?base_value,
            "base value changed"
        );
        self.base_value_changed.emit(&base_value);
        self.update_value()
    }

    fn reentrant_write(&self) -> CellError {
        CellError::ReentrantBaseValueWrite {
            property: self.property.name().to_owned(),
        }
    }

    // ========================================================================
    // Modifiers
    // ========================================================================

    /// Appends a modifier to the fold order and recomputes.
    pub fn add_modifier(&self, modifier: Arc<Modifier<T>>) -> Result<(), CellError> {
        let _sync = sync_root().enter();
        let cell = self.this.clone();
        let subscription = modifier.subscribe(move |_| {
            if let Some(cell) = cell.upgrade() {
                cell.on_modifier_invalidated();
            }
        });

        tracing::trace!(
            target: "effects::cell",
            property = self.property.name(),
            modifier = %modifier.id(),
            "modifier added"
        );
        {
            let mut state = lock(&self.state);
            state.modifiers.push(AttachedModifier {
                modifier,
                subscription,
            });
            state.flags.insert(CellFlags::HAS_MODIFIERS);
            if state.flags.contains(CellFlags::UPDATING) {
                return Ok(());
            }
            state.valid = false;
        }
        self.reset_computed_value()
    }

    /// Removes the first attachment of `modifier`. Returns false if it was not attached.
    pub fn remove_modifier(&self, modifier: &Arc<Modifier<T>>) -> Result<bool, CellError> {
        let _sync = sync_root().enter();
        let (attached, updating) = {
            let mut state = lock(&self.state);
            let Some(position) = state
                .modifiers
                .iter()
                .position(|attached| Arc::ptr_eq(&attached.modifier, modifier))
            else {
                return Ok(false);
            };
            let attached = state.modifiers.remove(position);
            let has_modifiers = !state.modifiers.is_empty();
            state.flags.set(CellFlags::HAS_MODIFIERS, has_modifiers);
            if !state.flags.contains(CellFlags::UPDATING) {
                state.valid = false;
            }
            (attached, state.flags.contains(CellFlags::UPDATING))
        };
        attached.modifier.unsubscribe(attached.subscription);

        tracing::trace!(
            target: "effects::cell",
            property = self.property.name(),
            modifier = %modifier.id(),
            "modifier removed"
        );
        if !updating {
            self.reset_computed_value()?;
        }
        Ok(true)
    }

    /// Attached modifiers in fold order.
    pub fn modifiers(&self) -> Vec<Arc<Modifier<T>>> {
        lock(&self.state).modifier_snapshot()
    }

    fn on_modifier_invalidated(&self) {
        let _sync = sync_root().enter();
        {
            let state = lock(&self.state);
            if state.flags.contains(CellFlags::UPDATING)
                || !state.flags.contains(CellFlags::COMPUTED)
            {
                return;
            }
        }
        if let Err(error) = self.reset_computed_value() {
            tracing::error!(
                target: "effects::cell",
                property = self.property.name(),
                %error,
                "failed to recompute after modifier invalidation"
            );
        }
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Discards the computed value and recomputes.
    pub fn reset_computed_value(&self) -> Result<(), CellError> {
        let _sync = sync_root().enter();
        {
            let mut state = lock(&self.state);
            state.valid = false;
            if state.flags.contains(CellFlags::COMPUTED) {
                state
                    .flags
                    .remove(CellFlags::COMPUTED | CellFlags::COERCED_WITH_COMPUTED);
                state.value.clear_computed();
                if state.flags.contains(CellFlags::USES_COERCION) {
                    state.reset_coerced();
                } else if !state.flags.contains(CellFlags::HAS_MODIFIERS) {
                    state.value.demote();
                }
            }
        }
        self.update_value()
    }

    /// Discards the coerced value and recomputes.
    pub fn reset_coerced_value(&self) -> Result<(), CellError> {
        let _sync = sync_root().enter();
        {
            let mut state = lock(&self.state);
            state.valid = false;
            state.reset_coerced();
        }
        self.update_value()
    }

    /// Re-derives the effective value from whatever inputs the cell depends on.
    pub fn invalidate(&self) -> Result<(), CellError> {
        let flags = self.flags();
        if flags.contains(CellFlags::HAS_MODIFIERS) {
            self.reset_computed_value()
        } else if flags.contains(CellFlags::USES_COERCION) {
            self.reset_coerced_value()
        } else {
            Ok(())
        }
    }

    fn update_value(&self) -> Result<(), CellError> {
        let previous = {
            let state = lock(&self.state);
            if state.valid {
                return Ok(());
            }
            state.current.clone()
        };

        let next = self.ensure_value()?;
        {
            let mut state = lock(&self.state);
            state.current = Some(next.clone());
            state.valid = true;
        }

        let old_value = previous.unwrap_or_else(|| self.default_value().clone());
        if old_value == next {
            return Ok(());
        }

        tracing::trace!(
            target: "effects::cell",
            property = self.property.name(),
            old = ?old_value,
            new = ?next,
            "current value changed"
        );
        let args = PropertyChangedArgs {
            property: Arc::clone(&self.property),
            old_value,
            new_value: next,
        };
        self.current_value_changed.emit(&args);
        if let Some(owner) = self.owner.upgrade() {
            for callback in self.metadata.changed_callbacks() {
                callback(&owner, &args);
            }
        }
        Ok(())
    }

    fn ensure_value(&self) -> Result<T, CellError> {
        let plan = {
            let mut state = lock(&self.state);
            state.flags.insert(CellFlags::UPDATING);
            let base = state.value.base_ref(self.default_value()).clone();
            let has_modifiers = state.flags.contains(CellFlags::HAS_MODIFIERS);
            if has_modifiers && !state.flags.contains(CellFlags::COMPUTED) {
                state
                    .flags
                    .remove(CellFlags::COERCED | CellFlags::COERCED_WITH_COMPUTED);
                Plan {
                    effective: base.clone(),
                    base,
                    fold: true,
                }
            } else {
                let effective = if has_modifiers {
                    state.value.computed().cloned().unwrap_or_else(|| base.clone())
                } else {
                    base.clone()
                };
                Plan {
                    base,
                    effective,
                    fold: false,
                }
            }
        };
        let result = self.derive(plan);
        lock(&self.state).flags.remove(CellFlags::UPDATING);
        result
    }

    fn derive(&self, plan: Plan<T>) -> Result<T, CellError> {
        let mut effective = plan.effective;
        if plan.fold {
            effective = self.fold_modifiers(&plan.base)?;
            let computed = effective.clone();
            let mut state = lock(&self.state);
            state.value.update_record(|record| record.computed = Some(computed));
            state.flags.insert(CellFlags::COMPUTED);
        }

        {
            let state = lock(&self.state);
            if !state.flags.contains(CellFlags::USES_COERCION) {
                return Ok(effective);
            }
            if state.flags.contains(CellFlags::COERCED)
                && let Some(coerced) = state.value.coerced()
            {
                return Ok(coerced.clone());
            }
        }

        let coerced = self.coerce(effective);
        let stored = coerced.clone();
        let mut state = lock(&self.state);
        state.value.update_record(|record| record.coerced = Some(stored));
        state.flags.insert(CellFlags::COERCED);
        if state.flags.contains(CellFlags::COMPUTED) {
            state.flags.insert(CellFlags::COERCED_WITH_COMPUTED);
        }
        Ok(coerced)
    }

    /// Folds the modifiers over the base value, repeating until the modifier
    /// set is unchanged across a full pass.
    fn fold_modifiers(&self, base: &T) -> Result<T, CellError> {
        let passes = SystemConfig::current().max_fold_passes;
        for _ in 0..passes {
            let modifiers = lock(&self.state).modifier_snapshot();
            let computed = modifiers
                .iter()
                .fold(base.clone(), |current, modifier| {
                    modifier.provide_value(base, &current)
                });
            let after = lock(&self.state).modifier_snapshot();
            if same_modifier_set(&modifiers, &after) {
                return Ok(computed);
            }
        }

        tracing::warn!(
            target: "effects::cell",
            property = self.property.name(),
            passes,
            "modifier fold did not converge"
        );
        Err(CellError::FoldDidNotConverge {
            property: self.property.name().to_owned(),
            passes,
        })
    }

    fn coerce(&self, value: T) -> T {
        let Some(callback) = self.metadata.coerce_callback() else {
            return value;
        };
        let Some(owner) = self.owner.upgrade() else {
            return value;
        };
        match callback(&owner, &value) {
            Coercion::Value(coerced) => coerced,
            Coercion::Revert => value,
        }
    }

    // ========================================================================
    // Observation & inspection
    // ========================================================================

    /// Subscribes to base value changes; the handler receives the new base value.
    pub fn on_base_value_changed(
        &self,
        handler: impl Fn(&T) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.base_value_changed.subscribe(handler)
    }

    pub fn unsubscribe_base_value_changed(&self, id: SubscriptionId) -> bool {
        self.base_value_changed.unsubscribe(id)
    }

    /// Subscribes to effective value changes.
    pub fn on_current_value_changed(
        &self,
        handler: impl Fn(&PropertyChangedArgs<T>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.current_value_changed.subscribe(handler)
    }

    pub fn unsubscribe_current_value_changed(&self, id: SubscriptionId) -> bool {
        self.current_value_changed.unsubscribe(id)
    }

    pub fn flags(&self) -> CellFlags {
        lock(&self.state).flags
    }

    pub fn has_modifiers(&self) -> bool {
        self.flags().contains(CellFlags::HAS_MODIFIERS)
    }

    pub fn uses_coercion(&self) -> bool {
        self.flags().contains(CellFlags::USES_COERCION)
    }

    /// True when the computed/coerced derivation record is allocated.
    pub fn is_materialized(&self) -> bool {
        matches!(lock(&self.state).value, CellValue::Modified(_))
    }
}

fn same_modifier_set<T: PropertyValue>(a: &[Arc<Modifier<T>>], b: &[Arc<Modifier<T>>]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| Arc::ptr_eq(x, y)))
}

impl<T: PropertyValue> fmt::Debug for PropertyCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("PropertyCell")
            .field("property", &self.property.name())
            .field("base", state.value.base_ref(self.default_value()))
            .field("current", &state.current)
            .field("flags", &state.flags)
            .field("modifiers", &state.modifiers.len())
            .finish()
    }
}

/// Type-erased view of a [`PropertyCell`], as stored in an entity's value map.
pub(crate) trait ErasedCell: Send + Sync {
    fn property(&self) -> Arc<dyn ErasedProperty>;

    fn encode_base_value(&self) -> Result<Vec<u8>, SnapshotError>;

    fn invalidate(&self) -> Result<(), CellError>;

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: PropertyValue> ErasedCell for PropertyCell<T> {
    fn property(&self) -> Arc<dyn ErasedProperty> {
        Arc::clone(&self.property) as Arc<dyn ErasedProperty>
    }

    fn encode_base_value(&self) -> Result<Vec<u8>, SnapshotError> {
        snapshot::encode_value(self.property.name(), &self.base_value())
    }

    fn invalidate(&self) -> Result<(), CellError> {
        PropertyCell::invalidate(self)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
