//! Per-source, per-group activation state machine.
//!
//! A [`GroupWorker`] observes its group's activation predicate and scope on
//! behalf of one source entity and keeps the set of attached targets in step
//! with them. Attach and detach calls are made with no worker lock held, so
//! property callbacks they trigger may freely re-enter the engine.

use std::mem;
use std::sync::{Arc, Mutex, Weak};

use effects_core::{DynamicEntity, SubscriptionId, lock, sync_root};
use strum::{Display, IntoStaticStr};

use crate::binding::EffectGroupBinding;
use crate::error::{EngineError, Result};
use crate::observable::{CollectionChange, ObservableCollection};
use crate::script::{ScriptProvider, ScriptValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum WorkerPhase {
    /// Not activated, or activated with a false predicate.
    Inactive,
    /// Evaluating activation and scope.
    Activating,
    /// Predicate true; scope targets attached.
    Active,
    /// Torn down by the engine.
    Deactivated,
}

struct Observed {
    provider: ScriptProvider,
    subscription: SubscriptionId,
}

impl Observed {
    fn release(self) {
        self.provider.unsubscribe(self.subscription);
    }
}

struct WatchedCollection {
    collection: Arc<ObservableCollection<DynamicEntity>>,
    subscription: SubscriptionId,
}

impl WatchedCollection {
    fn release(self) {
        self.collection.unsubscribe(self.subscription);
    }
}

struct Inputs {
    activation: Option<Observed>,
    scope: Observed,
}

struct WorkerState {
    phase: WorkerPhase,
    inputs: Option<Inputs>,
    collection: Option<WatchedCollection>,
    attached: Vec<DynamicEntity>,
    retired: bool,
}

pub(crate) struct GroupWorker {
    this: Weak<GroupWorker>,
    binding: Arc<EffectGroupBinding>,
    state: Mutex<WorkerState>,
}

impl GroupWorker {
    pub(crate) fn new(binding: EffectGroupBinding) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            binding: Arc::new(binding),
            state: Mutex::new(WorkerState {
                phase: WorkerPhase::Inactive,
                inputs: None,
                collection: None,
                attached: Vec::new(),
                retired: false,
            }),
        })
    }

    pub(crate) fn binding(&self) -> &Arc<EffectGroupBinding> {
        &self.binding
    }

    pub(crate) fn phase(&self) -> WorkerPhase {
        lock(&self.state).phase
    }

    // ========================================================================
    // Activation
    // ========================================================================

    /// Subscribes to the activation predicate and scope, then attaches the
    /// scope's targets if the predicate holds. No-op while already observing.
    pub(crate) fn activate(&self) -> Result<()> {
        let _sync = sync_root().enter();
        {
            let mut state = lock(&self.state);
            if state.retired || state.inputs.is_some() {
                return Ok(());
            }
            state.phase = WorkerPhase::Activating;
        }

        let inputs = match self.observe_inputs() {
            Ok(inputs) => inputs,
            Err(error) => {
                lock(&self.state).phase = WorkerPhase::Inactive;
                return Err(error);
            }
        };
        let is_active = inputs
            .activation
            .as_ref()
            .is_none_or(|activation| predicate_holds(&activation.provider.value()));
        {
            let mut state = lock(&self.state);
            state.inputs = Some(inputs);
            state.phase = if is_active {
                WorkerPhase::Active
            } else {
                WorkerPhase::Inactive
            };
        }

        tracing::debug!(
            target: "effects::engine",
            group = self.binding.group().name(),
            source = %self.binding.source(),
            active = is_active,
            "activated effect group"
        );
        if is_active {
            self.change_scope();
        }
        Ok(())
    }

    fn observe_inputs(&self) -> Result<Inputs> {
        let group = self.binding.group();
        let evaluator = self.binding.evaluator();
        let parameters = self.binding.parameters();

        let activation = group
            .activation()
            .map(|activation| -> Result<ScriptProvider> {
                let provider = evaluator.evaluate(&activation.value, &parameters)?;
                match provider.value() {
                    ScriptValue::Bool(_) | ScriptValue::Null => Ok(provider),
                    other => Err(EngineError::UnexpectedValue {
                        code: activation.value.clone(),
                        expected: "bool",
                        found: other.kind(),
                    }),
                }
            })
            .transpose()?;
        let scope = evaluator.evaluate(&group.scope().value, &parameters)?;
        if let value @ (ScriptValue::Bool(_)
        | ScriptValue::Int(_)
        | ScriptValue::Float(_)
        | ScriptValue::Text(_)) = scope.value()
        {
            return Err(EngineError::UnexpectedValue {
                code: group.scope().value.clone(),
                expected: "entity or entities",
                found: value.kind(),
            });
        }

        let activation = activation.map(|provider| {
            let worker = self.this.clone();
            let subscription = provider.subscribe(Arc::new(move |_: &()| {
                if let Some(worker) = worker.upgrade() {
                    worker.on_activation_changed();
                }
            }));
            Observed {
                provider,
                subscription,
            }
        });
        let scope = {
            let worker = self.this.clone();
            let subscription = scope.subscribe(Arc::new(move |_: &()| {
                if let Some(worker) = worker.upgrade() {
                    worker.change_scope();
                }
            }));
            Observed {
                provider: scope,
                subscription,
            }
        };
        Ok(Inputs { activation, scope })
    }

    fn on_activation_changed(&self) {
        let _sync = sync_root().enter();
        let (phase, provider) = {
            let state = lock(&self.state);
            let provider = state
                .inputs
                .as_ref()
                .and_then(|inputs| inputs.activation.as_ref())
                .map(|activation| Arc::clone(&activation.provider));
            (state.phase, provider)
        };
        let Some(provider) = provider else {
            return;
        };
        let is_active = predicate_holds(&provider.value());

        match (phase, is_active) {
            (WorkerPhase::Inactive, true) => {
                lock(&self.state).phase = WorkerPhase::Active;
                let condition = self.activation_description().unwrap_or_default();
                tracing::debug!(
                    target: "effects::engine",
                    group = self.binding.group().name(),
                    source = %self.binding.source(),
                    condition = %condition,
                    "effect condition activated"
                );
                self.change_scope();
            }
            (WorkerPhase::Active, false) => {
                let (targets, collection) = {
                    let mut state = lock(&self.state);
                    state.phase = WorkerPhase::Inactive;
                    (mem::take(&mut state.attached), state.collection.take())
                };
                if let Some(collection) = collection {
                    collection.release();
                }
                let condition = self.activation_description().unwrap_or_default();
                tracing::debug!(
                    target: "effects::engine",
                    group = self.binding.group().name(),
                    source = %self.binding.source(),
                    condition = %condition,
                    "effect condition deactivated"
                );
                self.apply(&targets, &[]);
            }
            _ => {}
        }
    }

    fn activation_description(&self) -> Option<String> {
        let code = self.binding.group().activation()?.description.as_deref()?;
        match self
            .binding
            .evaluator()
            .evaluate(code, &self.binding.parameters())
        {
            Ok(provider) => Some(provider.value().to_string()),
            Err(error) => {
                tracing::warn!(
                    target: "effects::engine",
                    group = self.binding.group().name(),
                    %error,
                    "failed to evaluate activation description"
                );
                None
            }
        }
    }

    // ========================================================================
    // Scope
    // ========================================================================

    /// Re-reads the scope and reconciles the attached target set with it.
    fn change_scope(&self) {
        let _sync = sync_root().enter();
        let provider = {
            let state = lock(&self.state);
            if state.phase != WorkerPhase::Active {
                return;
            }
            match state.inputs.as_ref() {
                Some(inputs) => Arc::clone(&inputs.scope.provider),
                None => return,
            }
        };

        let value = provider.value();
        let next = distinct(value.targets());
        let collection = match &value {
            ScriptValue::Collection(collection) => Some(Arc::clone(collection)),
            _ => None,
        };

        let (replaced, watch, to_detach, to_attach) = {
            let mut state = lock(&self.state);
            let unchanged = matches!(
                (&state.collection, &collection),
                (Some(watched), Some(next)) if Arc::ptr_eq(&watched.collection, next)
            );
            let replaced = if unchanged {
                None
            } else {
                state.collection.take()
            };
            let to_detach: Vec<DynamicEntity> = state
                .attached
                .iter()
                .filter(|target| !next.contains(target))
                .cloned()
                .collect();
            let to_attach: Vec<DynamicEntity> = next
                .iter()
                .filter(|target| !state.attached.contains(target))
                .cloned()
                .collect();
            state.attached = next;
            (replaced, collection.filter(|_| !unchanged), to_detach, to_attach)
        };

        if let Some(replaced) = replaced {
            replaced.release();
        }
        if let Some(collection) = watch {
            let worker = self.this.clone();
            let subscription = collection.subscribe(move |change| {
                if let Some(worker) = worker.upgrade() {
                    worker.on_collection_changed(change);
                }
            });
            lock(&self.state).collection = Some(WatchedCollection {
                collection,
                subscription,
            });
        }

        self.apply(&to_detach, &to_attach);
    }

    fn on_collection_changed(&self, change: &CollectionChange<DynamicEntity>) {
        let _sync = sync_root().enter();
        let (removed, added): (&[DynamicEntity], &[DynamicEntity]) = match change {
            CollectionChange::Added(items) => (&[][..], items.as_slice()),
            CollectionChange::Removed(items) => (items.as_slice(), &[][..]),
            CollectionChange::Replaced { old, new } => (old.as_slice(), new.as_slice()),
            CollectionChange::Reset => {
                self.change_scope();
                return;
            }
            CollectionChange::Moved => return,
        };

        let (to_detach, to_attach) = {
            let mut state = lock(&self.state);
            if state.phase != WorkerPhase::Active {
                return;
            }
            let to_detach: Vec<DynamicEntity> = state
                .attached
                .iter()
                .filter(|target| removed.contains(target) && !added.contains(target))
                .cloned()
                .collect();
            state.attached.retain(|target| !to_detach.contains(target));
            let to_attach: Vec<DynamicEntity> = distinct(added.to_vec())
                .into_iter()
                .filter(|target| !state.attached.contains(target))
                .collect();
            state.attached.extend(to_attach.iter().cloned());
            (to_detach, to_attach)
        };
        self.apply(&to_detach, &to_attach);
    }

    fn apply(&self, to_detach: &[DynamicEntity], to_attach: &[DynamicEntity]) {
        for target in to_detach {
            self.binding.detach_target(target);
        }
        for target in to_attach {
            if let Err(error) = self.binding.attach_target(target) {
                tracing::warn!(
                    target: "effects::engine",
                    group = self.binding.group().name(),
                    source = %self.binding.source(),
                    target = %target,
                    %error,
                    "effect group attached with errors"
                );
            }
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Stops observing and detaches every target.
    ///
    /// A retired worker never activates again.
    pub(crate) fn deactivate(&self, retire: bool) {
        let _sync = sync_root().enter();
        let (inputs, collection, targets) = {
            let mut state = lock(&self.state);
            state.retired |= retire;
            if state.phase == WorkerPhase::Deactivated && state.inputs.is_none() {
                return;
            }
            state.phase = WorkerPhase::Deactivated;
            (
                state.inputs.take(),
                state.collection.take(),
                mem::take(&mut state.attached),
            )
        };

        if let Some(inputs) = inputs {
            if let Some(activation) = inputs.activation {
                activation.release();
            }
            inputs.scope.release();
        }
        if let Some(collection) = collection {
            collection.release();
        }
        self.apply(&targets, &[]);

        tracing::debug!(
            target: "effects::engine",
            group = self.binding.group().name(),
            source = %self.binding.source(),
            detached = targets.len(),
            "deactivated effect group"
        );
    }
}

/// Null and non-boolean predicate values count as false.
fn predicate_holds(value: &ScriptValue) -> bool {
    value.as_bool().unwrap_or(false)
}

fn distinct(targets: Vec<DynamicEntity>) -> Vec<DynamicEntity> {
    let mut unique: Vec<DynamicEntity> = Vec::with_capacity(targets.len());
    for target in targets {
        if !unique.contains(&target) {
            unique.push(target);
        }
    }
    unique
}
