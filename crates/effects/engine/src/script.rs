//! Expression evaluation boundary.
//!
//! Effect groups reference their activation predicates, scopes and effect
//! values as opaque expression strings. The engine never interprets them
//! itself: an [`ExpressionEvaluator`] turns each expression, together with a
//! set of [`RuntimeParameters`], into an observable [`ScriptValue`] provider.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use effects_core::{DynamicEntity, lock};
use thiserror::Error;

use crate::observable::{ConstantValue, ObservableCollection, ValueProvider};

/// Parameter naming the entity that owns an effect group.
pub const SOURCE_PARAMETER: &str = "source";

/// Parameter naming the entity an effect is applied to.
pub const TARGET_PARAMETER: &str = "target";

// ============================================================================
// Values
// ============================================================================

/// Dynamically typed result of an expression.
#[derive(Clone, Debug, Default)]
pub enum ScriptValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Entity(DynamicEntity),
    Entities(Vec<DynamicEntity>),
    /// A live list of entities; scopes holding one follow its changes.
    Collection(Arc<ObservableCollection<DynamicEntity>>),
}

impl ScriptValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Entity(_) => "entity",
            Self::Entities(_) => "entities",
            Self::Collection(_) => "collection",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&DynamicEntity> {
        match self {
            Self::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    /// Entities this value designates when used as a scope.
    ///
    /// A single entity is a one-element scope; null and non-entity values are
    /// empty scopes.
    pub fn targets(&self) -> Vec<DynamicEntity> {
        match self {
            Self::Entity(entity) => vec![entity.clone()],
            Self::Entities(entities) => entities.clone(),
            Self::Collection(collection) => collection.items(),
            _ => Vec::new(),
        }
    }
}

impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Entity(a), Self::Entity(b)) => a == b,
            (Self::Entities(a), Self::Entities(b)) => a == b,
            (Self::Collection(a), Self::Collection(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
            Self::Entity(entity) => write!(f, "{entity}"),
            Self::Entities(entities) => write!(f, "[{} entities]", entities.len()),
            Self::Collection(collection) => write!(f, "[{} entities]", collection.len()),
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for ScriptValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for ScriptValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f32> for ScriptValue {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<DynamicEntity> for ScriptValue {
    fn from(value: DynamicEntity) -> Self {
        Self::Entity(value)
    }
}

impl From<Vec<DynamicEntity>> for ScriptValue {
    fn from(value: Vec<DynamicEntity>) -> Self {
        Self::Entities(value)
    }
}

impl From<Arc<ObservableCollection<DynamicEntity>>> for ScriptValue {
    fn from(value: Arc<ObservableCollection<DynamicEntity>>) -> Self {
        Self::Collection(value)
    }
}

/// Conversion from an expression result into a property operand.
///
/// Returns `None` when the value cannot represent `Self`. Integers widen to
/// floats; floats never narrow to integers.
pub trait FromScriptValue: Sized {
    fn from_script_value(value: &ScriptValue) -> Option<Self>;
}

impl FromScriptValue for bool {
    fn from_script_value(value: &ScriptValue) -> Option<Self> {
        value.as_bool()
    }
}

impl FromScriptValue for i64 {
    fn from_script_value(value: &ScriptValue) -> Option<Self> {
        match value {
            ScriptValue::Int(value) => Some(*value),
            _ => None,
        }
    }
}

macro_rules! narrow_int {
    ($($ty:ty),*) => {
        $(
            impl FromScriptValue for $ty {
                fn from_script_value(value: &ScriptValue) -> Option<Self> {
                    i64::from_script_value(value).and_then(|v| <$ty>::try_from(v).ok())
                }
            }
        )*
    };
}

narrow_int!(i32, u32, u64);

impl FromScriptValue for f64 {
    fn from_script_value(value: &ScriptValue) -> Option<Self> {
        match value {
            ScriptValue::Float(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            ScriptValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }
}

impl FromScriptValue for f32 {
    #[allow(clippy::cast_possible_truncation)]
    fn from_script_value(value: &ScriptValue) -> Option<Self> {
        f64::from_script_value(value).map(|v| v as f32)
    }
}

impl FromScriptValue for String {
    fn from_script_value(value: &ScriptValue) -> Option<Self> {
        match value {
            ScriptValue::Text(text) => Some(text.clone()),
            _ => None,
        }
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Named values made available to an expression.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuntimeParameters {
    values: BTreeMap<String, ScriptValue>,
}

impl RuntimeParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ScriptValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ScriptValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ScriptValue> {
        self.values.get(name)
    }

    pub fn source(&self) -> Option<&DynamicEntity> {
        self.get(SOURCE_PARAMETER).and_then(ScriptValue::as_entity)
    }

    pub fn target(&self) -> Option<&DynamicEntity> {
        self.get(TARGET_PARAMETER).and_then(ScriptValue::as_entity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScriptValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Failure to turn an expression into a value provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot evaluate `{code}`: {message}")]
pub struct ScriptError {
    pub code: String,
    pub message: String,
}

impl ScriptError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

pub type ScriptProvider = Arc<dyn ValueProvider<ScriptValue>>;

/// Compiles expressions into observable values.
///
/// Implementations decide the expression language. The returned provider must
/// notify its subscribers whenever the expression's result may have changed.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(
        &self,
        code: &str,
        parameters: &RuntimeParameters,
    ) -> Result<ScriptProvider, ScriptError>;
}

type ExpressionFactory =
    Arc<dyn Fn(&RuntimeParameters) -> Result<ScriptProvider, String> + Send + Sync>;

/// Evaluator backed by a table of expressions registered from Rust.
///
/// Each registered expression is a factory receiving the runtime parameters.
/// Unknown expressions fail with a [`ScriptError`].
#[derive(Default)]
pub struct TableEvaluator {
    expressions: Mutex<HashMap<String, ExpressionFactory>>,
}

impl TableEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `code`, replacing any previous definition.
    pub fn define(
        &self,
        code: impl Into<String>,
        factory: impl Fn(&RuntimeParameters) -> Result<ScriptProvider, String> + Send + Sync + 'static,
    ) {
        lock(&self.expressions).insert(code.into(), Arc::new(factory));
    }

    /// Registers `code` as an expression that always yields `value`.
    pub fn define_constant(&self, code: impl Into<String>, value: impl Into<ScriptValue>) {
        let value = value.into();
        self.define(code, move |_| Ok(ConstantValue::new(value.clone()) as ScriptProvider));
    }

    pub fn is_defined(&self, code: &str) -> bool {
        lock(&self.expressions).contains_key(code)
    }

    pub fn len(&self) -> usize {
        lock(&self.expressions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExpressionEvaluator for TableEvaluator {
    fn evaluate(
        &self,
        code: &str,
        parameters: &RuntimeParameters,
    ) -> Result<ScriptProvider, ScriptError> {
        let factory = lock(&self.expressions)
            .get(code)
            .cloned()
            .ok_or_else(|| ScriptError::new(code, "expression is not defined"))?;
        factory(parameters).map_err(|message| ScriptError::new(code, message))
    }
}

impl fmt::Debug for TableEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes: Vec<String> = lock(&self.expressions).keys().cloned().collect();
        codes.sort_unstable();
        f.debug_struct("TableEvaluator")
            .field("expressions", &codes)
            .finish()
    }
}
