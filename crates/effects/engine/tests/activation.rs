mod common;

use std::sync::Arc;

use common::{
    ADJACENT_COLONIES, Colony, Galaxy, MORALE, MORALE_BONUS, MORALE_BONUS_VALUE, Outpost,
    POPULATION, POPULATION_THRESHOLD, Starship, colonies, morale,
};
use effects_core::DynamicEntity;
use effects_engine::{Effect, EffectEngine, EffectGroup, EngineConfig, WorkerPhase};

fn prosperity(engine: &EffectEngine) {
    engine
        .register_group(
            EffectGroup::for_source::<Colony>("Prosperity", ADJACENT_COLONIES)
                .with_activation(POPULATION_THRESHOLD)
                .with_effect(Effect::offset(MORALE.clone(), "5")),
        )
        .expect("register group");
}

/// Crossing the population threshold attaches the group to every neighbor;
/// dropping below detaches; oscillation never stacks bindings.
#[test]
fn population_threshold_gates_neighbors() {
    let galaxy = Galaxy::new();
    let engine = galaxy.engine();
    prosperity(&engine);

    let capital = DynamicEntity::new::<Colony>();
    let neighbors = colonies(2);
    for neighbor in &neighbors {
        galaxy.neighbors_of(&capital).push(neighbor.clone());
    }
    capital.set_base_value(&POPULATION, 800).expect("population");
    assert_eq!(engine.register_source(&capital).expect("register"), 1);

    assert_eq!(
        engine.worker_phase(&capital, "Prosperity"),
        Some(WorkerPhase::Inactive)
    );
    assert!(neighbors.iter().all(|n| morale(n) == 0));

    capital.set_base_value(&POPULATION, 1_500).expect("population");
    assert_eq!(
        engine.worker_phase(&capital, "Prosperity"),
        Some(WorkerPhase::Active)
    );
    assert!(neighbors.iter().all(|n| morale(n) == 5));
    let group_binding = Arc::clone(&engine.group_bindings(&capital)[0]);
    let first = group_binding.bindings_for(&neighbors[0]);

    // Still above the threshold: activation is a no-op.
    capital.set_base_value(&POPULATION, 2_000).expect("population");
    assert!(Arc::ptr_eq(
        &first[0],
        &group_binding.bindings_for(&neighbors[0])[0]
    ));

    capital.set_base_value(&POPULATION, 900).expect("population");
    assert_eq!(
        engine.worker_phase(&capital, "Prosperity"),
        Some(WorkerPhase::Inactive)
    );
    assert!(neighbors.iter().all(|n| morale(n) == 0));
    assert!(group_binding.attached_targets().is_empty());

    for population in [1_200, 700, 1_900, 600, 1_001] {
        capital
            .set_base_value(&POPULATION, population)
            .expect("population");
    }
    assert!(neighbors.iter().all(|n| morale(n) == 5));
    assert_eq!(group_binding.effect_bindings().len(), neighbors.len());
    for neighbor in &neighbors {
        let cell = neighbor.get_value(&MORALE).expect("cell");
        assert_eq!(cell.modifiers().len(), 1);
    }
}

/// Neighbors added while the condition is false are picked up on activation.
#[test]
fn scope_changes_while_inactive_apply_on_activation() {
    let galaxy = Galaxy::new();
    let engine = galaxy.engine();
    prosperity(&engine);

    let capital = DynamicEntity::new::<Colony>();
    engine.register_source(&capital).expect("register");
    let late = DynamicEntity::new::<Colony>();
    galaxy.neighbors_of(&capital).push(late.clone());
    assert_eq!(morale(&late), 0);

    capital.set_base_value(&POPULATION, 5_000).expect("population");
    assert_eq!(morale(&late), 5);
}

/// Groups apply to sources of their source type and its subtypes only.
#[test]
fn groups_follow_the_source_type_hierarchy() {
    let galaxy = Galaxy::new();
    let engine = galaxy.engine();
    prosperity(&engine);

    assert_eq!(
        engine
            .register_source(&DynamicEntity::new::<Outpost>())
            .expect("outpost"),
        1
    );
    assert_eq!(
        engine
            .register_source(&DynamicEntity::new::<Starship>())
            .expect("starship"),
        0
    );

    let colony = DynamicEntity::new::<Colony>();
    assert_eq!(engine.register_source(&colony).expect("colony"), 1);
    assert_eq!(engine.register_source(&colony).expect("again"), 0);
    assert_eq!(engine.sources().len(), 3);
}

/// Without an activation expression a group is active as soon as it activates,
/// and effect values track the expressions they come from.
#[test]
fn unconditional_group_tracks_effect_values() {
    let galaxy = Galaxy::new();
    let engine = galaxy.engine();
    engine
        .register_group(
            EffectGroup::for_source::<Colony>("Patronage", ADJACENT_COLONIES)
                .with_effect(Effect::offset(MORALE.clone(), MORALE_BONUS_VALUE)),
        )
        .expect("register group");

    let patron = DynamicEntity::new::<Colony>();
    let client = DynamicEntity::new::<Colony>();
    galaxy.neighbors_of(&patron).push(client.clone());
    patron.set_base_value(&MORALE_BONUS, 3).expect("bonus");
    engine.register_source(&patron).expect("register");

    assert_eq!(
        engine.worker_phase(&patron, "Patronage"),
        Some(WorkerPhase::Active)
    );
    assert_eq!(morale(&client), 3);

    patron.set_base_value(&MORALE_BONUS, 7).expect("bonus");
    assert_eq!(morale(&client), 7);

    client.set_base_value(&MORALE, 10).expect("base morale");
    assert_eq!(morale(&client), 17);
}

/// Disabling tears every worker down; enabling brings them back.
#[test]
fn enable_and_disable_toggle_all_workers() {
    let galaxy = Galaxy::new();
    let engine = galaxy.engine_with(EngineConfig {
        enabled_on_start: false,
        ..EngineConfig::default()
    });
    prosperity(&engine);

    let capital = DynamicEntity::new::<Colony>();
    let neighbor = DynamicEntity::new::<Colony>();
    galaxy.neighbors_of(&capital).push(neighbor.clone());
    capital.set_base_value(&POPULATION, 3_000).expect("population");
    engine.register_source(&capital).expect("register");
    assert!(!engine.is_enabled());
    assert_eq!(morale(&neighbor), 0);

    engine.enable_effects();
    assert_eq!(morale(&neighbor), 5);

    engine.disable_effects();
    assert_eq!(
        engine.worker_phase(&capital, "Prosperity"),
        Some(WorkerPhase::Deactivated)
    );
    assert_eq!(morale(&neighbor), 0);

    // Deactivated workers no longer observe their inputs.
    capital.set_base_value(&POPULATION, 10).expect("population");
    capital.set_base_value(&POPULATION, 4_000).expect("population");
    assert_eq!(morale(&neighbor), 0);

    engine.enable_effects();
    assert_eq!(morale(&neighbor), 5);
}
