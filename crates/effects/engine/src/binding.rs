//! Live attachments of effects to target entities.
//!
//! An [`EffectGroupBinding`] ties one group to one source entity and tracks,
//! per attached target, one [`EffectBinding`] per effect. Each binding
//! contributes to its target's property through a [`Modifier`] fed by the
//! effect's value expression.

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex};

use effects_core::{
    DynamicEntity, Modifier, ModifierId, ModifierSuspension, PropertyCell, PropertyDefinition,
    PropertyValue, SubscriptionId, lock, sync_root,
};
use strum::{Display, IntoStaticStr};

use crate::error::{EngineError, Result};
use crate::group::{EffectGroup, EffectOperation};
use crate::script::{
    ExpressionEvaluator, FromScriptValue, RuntimeParameters, ScriptProvider, ScriptValue,
    TARGET_PARAMETER,
};

/// Attachment state of an [`EffectBinding`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum EffectState {
    Detached,
    Attached,
    /// Attached, but its modifier currently contributes nothing.
    Suspended,
}

/// Releases a suspension when dropped.
#[must_use = "the suspension ends as soon as the handle is dropped"]
pub struct SuspendHandle {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SuspendHandle {
    pub(crate) fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Combines several handles into one that releases them in order.
    pub fn composite(handles: Vec<SuspendHandle>) -> Self {
        Self::new(move || drop(handles))
    }
}

impl Drop for SuspendHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for SuspendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendHandle")
            .field("pending", &self.release.is_some())
            .finish()
    }
}

/// One effect applied to one target.
pub trait EffectBinding: Send + Sync {
    fn target(&self) -> &DynamicEntity;

    fn property_name(&self) -> &str;

    fn state(&self) -> EffectState;

    fn is_attached(&self) -> bool {
        self.state() != EffectState::Detached
    }

    /// Attached and not suspended.
    fn is_applied(&self) -> bool {
        self.state() == EffectState::Attached
    }

    /// Evaluates the value expression and installs the modifier. Idempotent.
    fn attach(&self) -> Result<()>;

    /// Removes the modifier and stops observing the value expression. Idempotent.
    fn detach(&self) -> Result<()>;

    /// Suspends the binding until the returned handle is dropped.
    ///
    /// Suspensions nest and survive detach/attach cycles.
    fn suspend(self: Arc<Self>) -> SuspendHandle;

    /// Evaluates the description expression, if any.
    fn description(&self) -> Option<String>;

    fn modifier_id(&self) -> Option<ModifierId>;
}

/// Everything a binding needs to evaluate its expressions.
#[derive(Clone)]
pub(crate) struct BindingContext {
    pub(crate) group: Arc<str>,
    pub(crate) evaluator: Arc<dyn ExpressionEvaluator>,
    pub(crate) parameters: RuntimeParameters,
}

// ============================================================================
// PropertyEffectBinding
// ============================================================================

struct Attachment<T: PropertyValue> {
    cell: Arc<PropertyCell<T>>,
    modifier: Arc<Modifier<T>>,
    operand: ScriptProvider,
    subscription: SubscriptionId,
}

struct BindingState<T: PropertyValue> {
    attached: Option<Attachment<T>>,
    suspend_depth: usize,
    held: Option<ModifierSuspension<T>>,
}

/// Binding of an effect on a property of value type `T`.
pub struct PropertyEffectBinding<T: PropertyValue> {
    property: Arc<PropertyDefinition<T>>,
    operation: EffectOperation<T>,
    target: DynamicEntity,
    value_expression: String,
    description_expression: Option<String>,
    context: BindingContext,
    state: Mutex<BindingState<T>>,
}

impl<T: PropertyValue + FromScriptValue> PropertyEffectBinding<T> {
    pub(crate) fn new(
        property: Arc<PropertyDefinition<T>>,
        operation: EffectOperation<T>,
        target: DynamicEntity,
        value_expression: String,
        description_expression: Option<String>,
        context: BindingContext,
    ) -> Self {
        Self {
            property,
            operation,
            target,
            value_expression,
            description_expression,
            context,
            state: Mutex::new(BindingState {
                attached: None,
                suspend_depth: 0,
                held: None,
            }),
        }
    }

    /// The modifier installed on the target, while attached.
    pub fn modifier(&self) -> Option<Arc<Modifier<T>>> {
        lock(&self.state)
            .attached
            .as_ref()
            .map(|attachment| Arc::clone(&attachment.modifier))
    }

    fn build_modifier(&self, operand: &ScriptProvider) -> Arc<Modifier<T>> {
        let operand = Arc::clone(operand);
        let operation = Arc::clone(&self.operation);
        let expression = self.value_expression.clone();
        Modifier::new(move |base: &T, current: &T| {
            let value = operand.value();
            match T::from_script_value(&value) {
                Some(value) => operation(base, current, &value),
                None => {
                    tracing::warn!(
                        target: "effects::binding",
                        expression = %expression,
                        kind = value.kind(),
                        expected = std::any::type_name::<T>(),
                        "effect value has the wrong kind; contributing nothing"
                    );
                    current.clone()
                }
            }
        })
    }

    fn resume(&self) {
        let _sync = sync_root().enter();
        let held = {
            let mut state = lock(&self.state);
            state.suspend_depth = state.suspend_depth.saturating_sub(1);
            if state.suspend_depth == 0 {
                state.held.take()
            } else {
                None
            }
        };
        drop(held);
    }
}

impl<T: PropertyValue + FromScriptValue> EffectBinding for PropertyEffectBinding<T> {
    fn target(&self) -> &DynamicEntity {
        &self.target
    }

    fn property_name(&self) -> &str {
        self.property.name()
    }

    fn state(&self) -> EffectState {
        let state = lock(&self.state);
        match (&state.attached, state.suspend_depth) {
            (None, _) => EffectState::Detached,
            (Some(_), 0) => EffectState::Attached,
            (Some(_), _) => EffectState::Suspended,
        }
    }

    fn attach(&self) -> Result<()> {
        let _sync = sync_root().enter();
        if lock(&self.state).attached.is_some() {
            return Ok(());
        }

        let operand = self
            .context
            .evaluator
            .evaluate(&self.value_expression, &self.context.parameters)?;
        let modifier = self.build_modifier(&operand);
        let subscription = {
            let modifier = Arc::downgrade(&modifier);
            operand.subscribe(Arc::new(move |_: &()| {
                if let Some(modifier) = modifier.upgrade() {
                    modifier.invalidate();
                }
            }))
        };

        let cell = match self.target.get_value(&self.property) {
            Ok(cell) => cell,
            Err(error) => {
                operand.unsubscribe(subscription);
                return Err(error.into());
            }
        };

        let suspended = lock(&self.state).suspend_depth > 0;
        let held = suspended.then(|| modifier.suspend());
        // The modifier is in the cell even when the recompute fails.
        let added = cell.add_modifier(Arc::clone(&modifier));
        {
            let mut state = lock(&self.state);
            state.attached = Some(Attachment {
                cell,
                modifier,
                operand,
                subscription,
            });
            if held.is_some() {
                state.held = held;
            }
        }

        tracing::debug!(
            target: "effects::binding",
            group = %self.context.group,
            target = %self.target,
            property = self.property.name(),
            "attached effect"
        );
        added.map_err(EngineError::from)
    }

    fn detach(&self) -> Result<()> {
        let _sync = sync_root().enter();
        let (attachment, held) = {
            let mut state = lock(&self.state);
            (state.attached.take(), state.held.take())
        };
        let Some(attachment) = attachment else {
            return Ok(());
        };

        attachment.operand.unsubscribe(attachment.subscription);
        let removed = attachment.cell.remove_modifier(&attachment.modifier);
        // The modifier left the cell already, so resuming it notifies nobody.
        drop(held);

        tracing::debug!(
            target: "effects::binding",
            group = %self.context.group,
            target = %self.target,
            property = self.property.name(),
            "detached effect"
        );
        removed.map(|_| ()).map_err(EngineError::from)
    }

    fn suspend(self: Arc<Self>) -> SuspendHandle {
        let _sync = sync_root().enter();
        let modifier = {
            let mut state = lock(&self.state);
            state.suspend_depth += 1;
            if state.suspend_depth == 1 {
                state
                    .attached
                    .as_ref()
                    .map(|attachment| Arc::clone(&attachment.modifier))
            } else {
                None
            }
        };
        if let Some(modifier) = modifier {
            let guard = modifier.suspend();
            lock(&self.state).held = Some(guard);
        }
        SuspendHandle::new(move || self.resume())
    }

    fn description(&self) -> Option<String> {
        let code = self.description_expression.as_deref()?;
        match self.context.evaluator.evaluate(code, &self.context.parameters) {
            Ok(provider) => match provider.value() {
                ScriptValue::Null => None,
                ScriptValue::Text(text) => Some(text),
                other => Some(other.to_string()),
            },
            Err(error) => {
                tracing::warn!(
                    target: "effects::binding",
                    group = %self.context.group,
                    %error,
                    "failed to evaluate effect description"
                );
                None
            }
        }
    }

    fn modifier_id(&self) -> Option<ModifierId> {
        lock(&self.state)
            .attached
            .as_ref()
            .map(|attachment| attachment.modifier.id())
    }
}

// ============================================================================
// Suspension scope
// ============================================================================

/// Engine-wide suspension bookkeeping shared with every group binding.
pub(crate) struct SuspensionScope {
    suspend_new_bindings: bool,
    state: Mutex<ScopeState>,
}

#[derive(Default)]
struct ScopeState {
    depth: usize,
    handles: Vec<SuspendHandle>,
}

impl SuspensionScope {
    pub(crate) fn new(suspend_new_bindings: bool) -> Self {
        Self {
            suspend_new_bindings,
            state: Mutex::new(ScopeState::default()),
        }
    }

    pub(crate) fn is_suspended(&self) -> bool {
        lock(&self.state).depth > 0
    }

    /// Returns true if bindings attached now should start suspended.
    pub(crate) fn suspends_new_bindings(&self) -> bool {
        self.suspend_new_bindings && self.is_suspended()
    }

    /// Enters one suspension level. The outermost level suspends `bindings()`.
    pub(crate) fn enter(&self, bindings: impl FnOnce() -> Vec<Arc<dyn EffectBinding>>) {
        let outermost = {
            let mut state = lock(&self.state);
            state.depth += 1;
            state.depth == 1
        };
        if outermost {
            let handles: Vec<SuspendHandle> =
                bindings().into_iter().map(|binding| binding.suspend()).collect();
            lock(&self.state).handles.extend(handles);
        }
    }

    /// Leaves one suspension level. The outermost level resumes every binding.
    pub(crate) fn exit(&self) {
        let released = {
            let mut state = lock(&self.state);
            state.depth = state.depth.saturating_sub(1);
            if state.depth == 0 {
                mem::take(&mut state.handles)
            } else {
                Vec::new()
            }
        };
        drop(released);
    }

    /// Keeps `handle` until the outermost suspension ends.
    pub(crate) fn adopt(&self, handle: SuspendHandle) {
        let rejected = {
            let mut state = lock(&self.state);
            if state.depth > 0 {
                state.handles.push(handle);
                None
            } else {
                Some(handle)
            }
        };
        drop(rejected);
    }
}

// ============================================================================
// EffectGroupBinding
// ============================================================================

struct TargetBindings {
    target: DynamicEntity,
    bindings: Vec<Arc<dyn EffectBinding>>,
}

/// One effect group bound to one source entity.
pub struct EffectGroupBinding {
    group: Arc<EffectGroup>,
    source: DynamicEntity,
    evaluator: Arc<dyn ExpressionEvaluator>,
    suspension: Arc<SuspensionScope>,
    targets: Mutex<Vec<TargetBindings>>,
}

impl EffectGroupBinding {
    pub(crate) fn new(
        group: Arc<EffectGroup>,
        source: DynamicEntity,
        evaluator: Arc<dyn ExpressionEvaluator>,
        suspension: Arc<SuspensionScope>,
    ) -> Self {
        Self {
            group,
            source,
            evaluator,
            suspension,
            targets: Mutex::new(Vec::new()),
        }
    }

    pub fn group(&self) -> &Arc<EffectGroup> {
        &self.group
    }

    pub fn source(&self) -> &DynamicEntity {
        &self.source
    }

    pub(crate) fn evaluator(&self) -> &Arc<dyn ExpressionEvaluator> {
        &self.evaluator
    }

    /// Parameters for the group's activation and scope expressions.
    pub fn parameters(&self) -> RuntimeParameters {
        self.group.parameters_for(&self.source)
    }

    pub fn attached_targets(&self) -> Vec<DynamicEntity> {
        lock(&self.targets)
            .iter()
            .map(|entry| entry.target.clone())
            .collect()
    }

    pub fn is_attached_to(&self, target: &DynamicEntity) -> bool {
        lock(&self.targets)
            .iter()
            .any(|entry| entry.target == *target)
    }

    /// Every effect binding across all attached targets.
    pub fn effect_bindings(&self) -> Vec<Arc<dyn EffectBinding>> {
        lock(&self.targets)
            .iter()
            .flat_map(|entry| entry.bindings.iter().cloned())
            .collect()
    }

    /// Effect bindings on `target`, in effect order.
    pub fn bindings_for(&self, target: &DynamicEntity) -> Vec<Arc<dyn EffectBinding>> {
        lock(&self.targets)
            .iter()
            .find(|entry| entry.target == *target)
            .map(|entry| entry.bindings.clone())
            .unwrap_or_default()
    }

    /// Binds every effect of the group to `target`.
    ///
    /// All effects are attempted; the first failure is returned. Bindings that
    /// failed stay registered so a later detach cleans them up.
    pub(crate) fn attach_target(&self, target: &DynamicEntity) -> Result<()> {
        let _sync = sync_root().enter();
        if self.is_attached_to(target) {
            return Err(EngineError::TargetAlreadyAttached {
                group: self.group.name().to_owned(),
                target: target.id(),
            });
        }

        let context = BindingContext {
            group: Arc::from(self.group.name()),
            evaluator: Arc::clone(&self.evaluator),
            parameters: self.parameters().with(TARGET_PARAMETER, target.clone()),
        };
        let bindings: Vec<Arc<dyn EffectBinding>> = self
            .group
            .effects()
            .iter()
            .map(|effect| effect.bind(target, context.clone()))
            .collect();
        lock(&self.targets).push(TargetBindings {
            target: target.clone(),
            bindings: bindings.clone(),
        });

        if self.suspension.suspends_new_bindings() {
            for binding in &bindings {
                self.suspension.adopt(Arc::clone(binding).suspend());
            }
        }

        let mut first_error = None;
        for binding in &bindings {
            if let Err(error) = binding.attach() {
                tracing::error!(
                    target: "effects::binding",
                    group = self.group.name(),
                    source = %self.source,
                    target = %target,
                    property = binding.property_name(),
                    %error,
                    "failed to attach effect"
                );
                first_error.get_or_insert(error);
            }
        }

        tracing::debug!(
            target: "effects::binding",
            group = self.group.name(),
            source = %self.source,
            target = %target,
            effects = bindings.len(),
            "attached effect group to target"
        );
        first_error.map_or(Ok(()), Err)
    }

    /// Detaches every effect from `target`, continuing past failures.
    ///
    /// Returns the number of effects that failed to detach cleanly.
    pub(crate) fn detach_target(&self, target: &DynamicEntity) -> usize {
        let _sync = sync_root().enter();
        let removed = {
            let mut targets = lock(&self.targets);
            targets
                .iter()
                .position(|entry| entry.target == *target)
                .map(|position| targets.remove(position))
        };
        let Some(removed) = removed else {
            return 0;
        };

        let mut failures = 0;
        for binding in &removed.bindings {
            if let Err(error) = binding.detach() {
                failures += 1;
                tracing::error!(
                    target: "effects::binding",
                    group = self.group.name(),
                    source = %self.source,
                    target = %target,
                    property = binding.property_name(),
                    error = ?error,
                    "failed to detach effect; continuing with remaining effects"
                );
            }
        }

        tracing::debug!(
            target: "effects::binding",
            group = self.group.name(),
            source = %self.source,
            target = %target,
            failures,
            "detached effect group from target"
        );
        failures
    }
}

impl fmt::Debug for EffectGroupBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectGroupBinding")
            .field("group", &self.group.name())
            .field("source", &self.source.id())
            .field("targets", &lock(&self.targets).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Effect;
    use crate::observable::ObservableValue;
    use crate::script::TableEvaluator;
    use effects_core::{Entity, EntityType};

    struct Relay;
    impl EntityType for Relay {
        const NAME: &'static str = "BindingTestRelay";
        type Base = Entity;
    }

    fn harness(
        property: &str,
        operand: &Arc<ObservableValue<ScriptValue>>,
    ) -> (Arc<PropertyDefinition<i64>>, EffectGroupBinding, Arc<SuspensionScope>) {
        let property =
            PropertyDefinition::<i64>::register(property, effects_core::TypeToken::of::<Relay>())
                .expect("register property");
        let evaluator = TableEvaluator::new();
        {
            let operand = Arc::clone(operand);
            evaluator.define("operand", move |_| Ok(Arc::clone(&operand) as ScriptProvider));
        }
        evaluator.define_constant("'Signal boost'", "Signal boost");

        let group = EffectGroup::for_source::<Relay>("Boost", "target")
            .with_effect(
                Effect::offset(Arc::clone(&property), "operand").with_description("'Signal boost'"),
            );
        let suspension = Arc::new(SuspensionScope::new(true));
        let binding = EffectGroupBinding::new(
            Arc::new(group),
            DynamicEntity::new::<Relay>(),
            Arc::new(evaluator),
            Arc::clone(&suspension),
        );
        (property, binding, suspension)
    }

    #[test]
    fn binding_follows_its_operand() {
        let operand = ObservableValue::new(ScriptValue::Int(5));
        let (property, group_binding, _) = harness("Gain", &operand);
        let target = DynamicEntity::new::<Relay>();

        group_binding.attach_target(&target).expect("attach");
        assert_eq!(target.current_value(&property).expect("value"), 5);

        operand.set(ScriptValue::Int(8));
        assert_eq!(target.current_value(&property).expect("value"), 8);

        let binding = &group_binding.bindings_for(&target)[0];
        assert_eq!(binding.state(), EffectState::Attached);
        assert_eq!(binding.description().as_deref(), Some("Signal boost"));

        assert_eq!(group_binding.detach_target(&target), 0);
        assert_eq!(binding.state(), EffectState::Detached);
        assert_eq!(target.current_value(&property).expect("value"), 0);
        assert_eq!(group_binding.detach_target(&target), 0);
    }

    #[test]
    fn double_attach_is_rejected() {
        let operand = ObservableValue::new(ScriptValue::Int(1));
        let (_, group_binding, _) = harness("Range", &operand);
        let target = DynamicEntity::new::<Relay>();

        group_binding.attach_target(&target).expect("attach");
        let error = group_binding.attach_target(&target).expect_err("second attach");
        assert!(matches!(error, EngineError::TargetAlreadyAttached { .. }));
        assert_eq!(group_binding.effect_bindings().len(), 1);
    }

    #[test]
    fn wrong_operand_kind_contributes_nothing() {
        let operand = ObservableValue::new(ScriptValue::from("not a number"));
        let (property, group_binding, _) = harness("Latency", &operand);
        let target = DynamicEntity::new::<Relay>();
        target.set_base_value(&property, 3).expect("base");

        group_binding.attach_target(&target).expect("attach");
        assert_eq!(target.current_value(&property).expect("value"), 3);
    }

    #[test]
    fn suspension_survives_reattachment() {
        let operand = ObservableValue::new(ScriptValue::Int(4));
        let (property, group_binding, _) = harness("Bandwidth", &operand);
        let target = DynamicEntity::new::<Relay>();
        group_binding.attach_target(&target).expect("attach");
        let binding = Arc::clone(&group_binding.bindings_for(&target)[0]);

        let handle = Arc::clone(&binding).suspend();
        assert_eq!(binding.state(), EffectState::Suspended);
        assert_eq!(target.current_value(&property).expect("value"), 0);

        binding.detach().expect("detach");
        binding.attach().expect("reattach");
        assert_eq!(binding.state(), EffectState::Suspended);
        assert_eq!(target.current_value(&property).expect("value"), 0);

        drop(handle);
        assert_eq!(binding.state(), EffectState::Attached);
        assert_eq!(target.current_value(&property).expect("value"), 4);
    }

    #[test]
    fn targets_attached_while_suspended_start_suspended() {
        let operand = ObservableValue::new(ScriptValue::Int(2));
        let (property, group_binding, suspension) = harness("Uplink", &operand);
        let target = DynamicEntity::new::<Relay>();

        suspension.enter(Vec::new);
        group_binding.attach_target(&target).expect("attach");
        assert_eq!(target.current_value(&property).expect("value"), 0);
        assert!(!group_binding.bindings_for(&target)[0].is_applied());

        suspension.exit();
        assert_eq!(target.current_value(&property).expect("value"), 2);
        assert!(group_binding.bindings_for(&target)[0].is_applied());
    }
}
