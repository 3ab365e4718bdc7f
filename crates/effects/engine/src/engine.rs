//! The effect engine.
//!
//! [`EffectEngine`] owns the registered effect groups and, for every
//! registered source entity, one worker per applicable group.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use effects_core::{CoreError, DynamicEntity, EntityId, lock, sync_root};

use crate::binding::{EffectBinding, EffectGroupBinding, SuspensionScope};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::group::EffectGroup;
use crate::script::ExpressionEvaluator;
use crate::worker::{GroupWorker, WorkerPhase};

struct SourceRegistration {
    source: DynamicEntity,
    workers: Vec<Arc<GroupWorker>>,
}

/// Applies effect groups to the entities their sources designate.
pub struct EffectEngine {
    config: EngineConfig,
    evaluator: Arc<dyn ExpressionEvaluator>,
    groups: Mutex<Vec<Arc<EffectGroup>>>,
    sources: Mutex<BTreeMap<EntityId, SourceRegistration>>,
    enabled: AtomicBool,
    suspension: Arc<SuspensionScope>,
}

impl EffectEngine {
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>, config: EngineConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled_on_start),
            suspension: Arc::new(SuspensionScope::new(config.suspend_new_bindings)),
            config,
            evaluator,
            groups: Mutex::new(Vec::new()),
            sources: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Groups
    // ========================================================================

    /// Registers `group` and binds it to every already registered source it applies to.
    pub fn register_group(&self, group: EffectGroup) -> Result<Arc<EffectGroup>> {
        let _sync = sync_root().enter();
        let group = Arc::new(group);

        let sources: Vec<DynamicEntity> = lock(&self.sources)
            .values()
            .map(|registration| registration.source.clone())
            .collect();
        let mut applicable = Vec::with_capacity(sources.len());
        for source in sources {
            if group.applies_to(&source).map_err(CoreError::from)? {
                applicable.push(source);
            }
        }
        lock(&self.groups).push(Arc::clone(&group));

        let mut workers = Vec::new();
        for source in applicable {
            let worker = self.create_worker(&group, &source);
            if let Some(registration) = lock(&self.sources).get_mut(&source.id()) {
                registration.workers.push(Arc::clone(&worker));
            }
            workers.push(worker);
        }

        tracing::info!(
            target: "effects::engine",
            group = group.name(),
            source_type = group.source_type().name(),
            effects = group.effects().len(),
            sources = workers.len(),
            "registered effect group"
        );
        if self.is_enabled() {
            self.activate_all(&workers);
        }
        Ok(group)
    }

    pub fn groups(&self) -> Vec<Arc<EffectGroup>> {
        lock(&self.groups).clone()
    }

    // ========================================================================
    // Sources
    // ========================================================================

    /// Creates a worker for every group applicable to `source`'s type and, if
    /// the engine is enabled, activates them.
    ///
    /// Activation failures are logged and do not abort registration. Returns
    /// the number of groups bound to the source.
    pub fn register_source(&self, source: &DynamicEntity) -> Result<usize> {
        let _sync = sync_root().enter();
        if self.is_registered(source) {
            tracing::debug!(
                target: "effects::engine",
                source = %source,
                "source already registered"
            );
            return Ok(0);
        }

        let mut workers = Vec::new();
        for group in self.groups() {
            if group.applies_to(source).map_err(CoreError::from)? {
                workers.push(self.create_worker(&group, source));
            }
        }
        lock(&self.sources).insert(
            source.id(),
            SourceRegistration {
                source: source.clone(),
                workers: workers.clone(),
            },
        );

        tracing::debug!(
            target: "effects::engine",
            source = %source,
            groups = workers.len(),
            "registered effect source"
        );
        if self.is_enabled() {
            self.activate_all(&workers);
        }
        Ok(workers.len())
    }

    /// Detaches everything `source`'s groups applied and forgets the source.
    pub fn unregister_source(&self, source: &DynamicEntity) -> bool {
        let _sync = sync_root().enter();
        let Some(registration) = lock(&self.sources).remove(&source.id()) else {
            return false;
        };
        for worker in &registration.workers {
            worker.deactivate(true);
        }
        tracing::debug!(
            target: "effects::engine",
            source = %source,
            groups = registration.workers.len(),
            "unregistered effect source"
        );
        true
    }

    pub fn is_registered(&self, source: &DynamicEntity) -> bool {
        lock(&self.sources).contains_key(&source.id())
    }

    pub fn sources(&self) -> Vec<DynamicEntity> {
        lock(&self.sources)
            .values()
            .map(|registration| registration.source.clone())
            .collect()
    }

    /// Group bindings of `source`, in group registration order.
    pub fn group_bindings(&self, source: &DynamicEntity) -> Vec<Arc<EffectGroupBinding>> {
        lock(&self.sources)
            .get(&source.id())
            .map(|registration| {
                registration
                    .workers
                    .iter()
                    .map(|worker| Arc::clone(worker.binding()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Phase of the worker running `group` for `source`.
    pub fn worker_phase(&self, source: &DynamicEntity, group: &str) -> Option<WorkerPhase> {
        lock(&self.sources)
            .get(&source.id())?
            .workers
            .iter()
            .find(|worker| worker.binding().group().name() == group)
            .map(|worker| worker.phase())
    }

    // ========================================================================
    // Enable / disable
    // ========================================================================

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Activates every registered worker. No-op if already enabled.
    pub fn enable_effects(&self) {
        let _sync = sync_root().enter();
        if self.enabled.swap(true, Ordering::AcqRel) {
            return;
        }
        let workers = self.workers();
        tracing::info!(
            target: "effects::engine",
            workers = workers.len(),
            "effects enabled"
        );
        self.activate_all(&workers);
    }

    /// Deactivates every registered worker, detaching all effects.
    pub fn disable_effects(&self) {
        let _sync = sync_root().enter();
        if !self.enabled.swap(false, Ordering::AcqRel) {
            return;
        }
        let workers = self.workers();
        for worker in &workers {
            worker.deactivate(false);
        }
        tracing::info!(
            target: "effects::engine",
            workers = workers.len(),
            "effects disabled"
        );
    }

    // ========================================================================
    // Suspension
    // ========================================================================

    /// Suspends every effect binding until the returned guard drops.
    ///
    /// Bindings stay attached while suspended. Guards nest; the outermost one
    /// resumes.
    pub fn suspend_effects(&self) -> EffectsSuspension {
        let _sync = sync_root().enter();
        self.suspension.enter(|| self.effect_bindings());
        tracing::info!(target: "effects::engine", "effects suspended");
        EffectsSuspension {
            scope: Arc::clone(&self.suspension),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspension.is_suspended()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn create_worker(&self, group: &Arc<EffectGroup>, source: &DynamicEntity) -> Arc<GroupWorker> {
        GroupWorker::new(EffectGroupBinding::new(
            Arc::clone(group),
            source.clone(),
            Arc::clone(&self.evaluator),
            Arc::clone(&self.suspension),
        ))
    }

    fn workers(&self) -> Vec<Arc<GroupWorker>> {
        lock(&self.sources)
            .values()
            .flat_map(|registration| registration.workers.iter().cloned())
            .collect()
    }

    fn effect_bindings(&self) -> Vec<Arc<dyn EffectBinding>> {
        self.workers()
            .iter()
            .flat_map(|worker| worker.binding().effect_bindings())
            .collect()
    }

    fn activate_all(&self, workers: &[Arc<GroupWorker>]) {
        for worker in workers {
            if let Err(error) = worker.activate() {
                tracing::error!(
                    target: "effects::engine",
                    group = worker.binding().group().name(),
                    source = %worker.binding().source(),
                    error = ?error,
                    "failed to activate effect group; continuing"
                );
            }
        }
    }
}

impl Drop for EffectEngine {
    fn drop(&mut self) {
        let _sync = sync_root().enter();
        for worker in self.workers() {
            worker.deactivate(true);
        }
    }
}

impl fmt::Debug for EffectEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectEngine")
            .field("config", &self.config)
            .field("groups", &lock(&self.groups).len())
            .field("sources", &lock(&self.sources).len())
            .field("enabled", &self.is_enabled())
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

/// Keeps the engine suspended while alive.
#[must_use = "effects resume as soon as the suspension is dropped"]
pub struct EffectsSuspension {
    scope: Arc<SuspensionScope>,
}

impl Drop for EffectsSuspension {
    fn drop(&mut self) {
        let _sync = sync_root().enter();
        self.scope.exit();
        tracing::info!(
            target: "effects::engine",
            suspended = self.scope.is_suspended(),
            "effects suspension released"
        );
    }
}

impl fmt::Debug for EffectsSuspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectsSuspension").finish_non_exhaustive()
    }
}
