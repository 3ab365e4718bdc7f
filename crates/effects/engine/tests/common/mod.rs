//! Shared fixtures for effects-engine integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, Once};

use effects_core::{DynamicEntity, Entity, EntityId, EntityType, PropertyDefinition, TypeToken};
use effects_engine::{
    CellValueProvider, ConstantValue, EffectEngine, EngineConfig, ExpressionEvaluator,
    ObservableCollection, ObservableValue, ScriptProvider, ScriptValue, TableEvaluator,
    ValueProvider, map_value,
};

/// Routes `effects::*` traces to the test writer. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub struct Colony;
impl EntityType for Colony {
    const NAME: &'static str = "Colony";
    type Base = Entity;
}

pub struct Outpost;
impl EntityType for Outpost {
    const NAME: &'static str = "Outpost";
    type Base = Colony;
}

pub struct Starship;
impl EntityType for Starship {
    const NAME: &'static str = "Starship";
    type Base = Entity;
}

fn colony_property<T: effects_core::PropertyValue>(name: &str) -> Arc<PropertyDefinition<T>> {
    PropertyDefinition::register(name, TypeToken::of::<Colony>())
        .unwrap_or_else(|error| panic!("register {name}: {error}"))
}

pub static POPULATION: LazyLock<Arc<PropertyDefinition<i64>>> =
    LazyLock::new(|| colony_property("Population"));

pub static MORALE: LazyLock<Arc<PropertyDefinition<i64>>> =
    LazyLock::new(|| colony_property("Morale"));

pub static SHIELDS: LazyLock<Arc<PropertyDefinition<i64>>> =
    LazyLock::new(|| colony_property("Shields"));

pub static MORALE_BONUS: LazyLock<Arc<PropertyDefinition<i64>>> =
    LazyLock::new(|| colony_property("MoraleBonus"));

pub static OUTPUT: LazyLock<Arc<PropertyDefinition<f64>>> =
    LazyLock::new(|| colony_property("Output"));

pub const POPULATION_THRESHOLD: &str = "source.Population > 1000";
pub const ADJACENT_COLONIES: &str = "source.AdjacentColonies";
pub const PATROL: &str = "source.Patrol";
pub const MORALE_BONUS_VALUE: &str = "source.MoraleBonus";

type Registry<T> = Arc<Mutex<HashMap<EntityId, Arc<T>>>>;

/// A toy scripting world: colony properties, neighbor lists and patrol routes
/// exposed to effect groups through a [`TableEvaluator`].
pub struct Galaxy {
    pub evaluator: Arc<TableEvaluator>,
    neighbors: Registry<ObservableCollection<DynamicEntity>>,
    patrols: Registry<ObservableValue<ScriptValue>>,
}

impl Galaxy {
    pub fn new() -> Self {
        init_tracing();
        let evaluator = Arc::new(TableEvaluator::new());
        let neighbors: Registry<ObservableCollection<DynamicEntity>> = Arc::default();
        let patrols: Registry<ObservableValue<ScriptValue>> = Arc::default();

        evaluator.define(POPULATION_THRESHOLD, |parameters| {
            let cell = source_cell(parameters.source(), &POPULATION)?;
            Ok(map_value(
                CellValueProvider::new(cell) as Arc<dyn ValueProvider<i64>>,
                |population| ScriptValue::Bool(population > 1000),
            ))
        });
        evaluator.define(MORALE_BONUS_VALUE, |parameters| {
            let cell = source_cell(parameters.source(), &MORALE_BONUS)?;
            Ok(map_value(
                CellValueProvider::new(cell) as Arc<dyn ValueProvider<i64>>,
                ScriptValue::Int,
            ))
        });
        {
            let neighbors = Arc::clone(&neighbors);
            evaluator.define(ADJACENT_COLONIES, move |parameters| {
                let source = parameters.source().ok_or_else(|| "no source".to_owned())?;
                let collection = entry(&neighbors, source, ObservableCollection::new);
                Ok(ConstantValue::new(ScriptValue::Collection(collection)) as ScriptProvider)
            });
        }
        {
            let patrols = Arc::clone(&patrols);
            evaluator.define(PATROL, move |parameters| {
                let source = parameters.source().ok_or_else(|| "no source".to_owned())?;
                Ok(entry(&patrols, source, || ObservableValue::new(ScriptValue::Null))
                    as ScriptProvider)
            });
        }
        evaluator.define_constant("5", 5);
        evaluator.define_constant("1.5", 1.5);
        evaluator.define_constant("'Garrisoned'", "Garrisoned");

        Self {
            evaluator,
            neighbors,
            patrols,
        }
    }

    pub fn engine(&self) -> EffectEngine {
        self.engine_with(EngineConfig::default())
    }

    pub fn engine_with(&self, config: EngineConfig) -> EffectEngine {
        EffectEngine::new(
            Arc::clone(&self.evaluator) as Arc<dyn ExpressionEvaluator>,
            config,
        )
    }

    pub fn neighbors_of(&self, colony: &DynamicEntity) -> Arc<ObservableCollection<DynamicEntity>> {
        entry(&self.neighbors, colony, ObservableCollection::new)
    }

    pub fn patrol_of(&self, source: &DynamicEntity) -> Arc<ObservableValue<ScriptValue>> {
        entry(&self.patrols, source, || ObservableValue::new(ScriptValue::Null))
    }
}

fn entry<T>(
    registry: &Registry<T>,
    entity: &DynamicEntity,
    create: impl FnOnce() -> Arc<T>,
) -> Arc<T> {
    let mut registry = registry.lock().unwrap_or_else(|e| e.into_inner());
    Arc::clone(registry.entry(entity.id()).or_insert_with(create))
}

fn source_cell(
    source: Option<&DynamicEntity>,
    property: &Arc<PropertyDefinition<i64>>,
) -> Result<Arc<effects_core::PropertyCell<i64>>, String> {
    let source = source.ok_or_else(|| "no source".to_owned())?;
    source.get_value(property).map_err(|error| error.to_string())
}

pub fn colonies(count: usize) -> Vec<DynamicEntity> {
    (0..count).map(|_| DynamicEntity::new::<Colony>()).collect()
}

pub fn morale(colony: &DynamicEntity) -> i64 {
    colony.current_value(&MORALE).expect("morale")
}
