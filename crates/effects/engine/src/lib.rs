//! Rule-driven effects on top of `effects-core` properties.
//!
//! An [`EffectGroup`] describes, for a source entity type, an activation
//! predicate, a target scope and a list of property [`Effect`]s. The
//! [`EffectEngine`] evaluates those expressions through an
//! [`ExpressionEvaluator`], keeps one worker per registered source and group,
//! and attaches or detaches modifiers on targets as the observed values change.
//!
//! Modules are organized by responsibility:
//! - [`observable`] provides the change-notifying values expressions produce
//! - [`script`] defines the evaluator boundary and script values
//! - [`group`] holds effect group definitions
//! - [`binding`] manages the modifiers attached for each target
//! - [`engine`] drives activation, scope tracking and suspension
//! - [`config`] loads engine and system settings from TOML
pub mod binding;
pub mod config;
pub mod engine;
pub mod error;
pub mod group;
pub mod observable;
pub mod script;
mod worker;

pub use binding::{
    EffectBinding, EffectGroupBinding, EffectState, PropertyEffectBinding, SuspendHandle,
};
pub use config::{EffectsConfig, EngineConfig, LoadResult};
pub use engine::{EffectEngine, EffectsSuspension};
pub use error::{EngineError, Result};
pub use group::{Effect, EffectGroup, EffectOperation, GroupExpression};
pub use observable::{
    CellValueProvider, ChangeHandler, CollectionChange, ConstantValue, MappedValue,
    ObservableCollection, ObservableValue, ValueProvider, map_value,
};
pub use script::{
    ExpressionEvaluator, FromScriptValue, RuntimeParameters, SOURCE_PARAMETER, ScriptError,
    ScriptProvider, ScriptValue, TARGET_PARAMETER, TableEvaluator,
};
pub use worker::WorkerPhase;
