mod common;

use common::{ADJACENT_COLONIES, Colony, Galaxy, MORALE, colonies, morale};
use effects_core::{DynamicEntity, ModifierId};
use effects_engine::{Effect, EffectEngine, EffectGroup, EffectState, EngineConfig};

fn garrison(engine: &EffectEngine) {
    engine
        .register_group(
            EffectGroup::for_source::<Colony>("Garrison", ADJACENT_COLONIES)
                .with_effect(Effect::offset(MORALE.clone(), "5")),
        )
        .expect("register group");
}

fn snapshot(
    engine: &EffectEngine,
    source: &DynamicEntity,
) -> Vec<(DynamicEntity, Option<ModifierId>)> {
    engine.group_bindings(source)[0]
        .effect_bindings()
        .iter()
        .map(|binding| (binding.target().clone(), binding.modifier_id()))
        .collect()
}

fn states(engine: &EffectEngine, source: &DynamicEntity) -> Vec<EffectState> {
    engine.group_bindings(source)[0]
        .effect_bindings()
        .iter()
        .map(|binding| binding.state())
        .collect()
}

/// Suspending and resuming keeps targets and modifier identities; only the
/// contribution toggles.
#[test]
fn suspend_and_resume_is_non_destructive() {
    let galaxy = Galaxy::new();
    let engine = galaxy.engine();
    garrison(&engine);

    let source = DynamicEntity::new::<Colony>();
    let neighbors = colonies(3);
    for neighbor in &neighbors {
        galaxy.neighbors_of(&source).push(neighbor.clone());
    }
    engine.register_source(&source).expect("register");
    let before = snapshot(&engine, &source);
    assert!(neighbors.iter().all(|n| morale(n) == 5));

    let suspension = engine.suspend_effects();
    assert!(engine.is_suspended());
    assert!(neighbors.iter().all(|n| morale(n) == 0));
    assert!(states(&engine, &source).iter().all(|s| *s == EffectState::Suspended));
    assert_eq!(snapshot(&engine, &source), before);

    drop(suspension);
    assert!(!engine.is_suspended());
    assert!(neighbors.iter().all(|n| morale(n) == 5));
    assert!(states(&engine, &source).iter().all(|s| *s == EffectState::Attached));
    assert_eq!(snapshot(&engine, &source), before);
}

/// Only the outermost suspension resumes.
#[test]
fn suspensions_nest() {
    let galaxy = Galaxy::new();
    let engine = galaxy.engine();
    garrison(&engine);

    let source = DynamicEntity::new::<Colony>();
    let neighbor = DynamicEntity::new::<Colony>();
    galaxy.neighbors_of(&source).push(neighbor.clone());
    engine.register_source(&source).expect("register");

    let outer = engine.suspend_effects();
    let inner = engine.suspend_effects();
    drop(inner);
    assert!(engine.is_suspended());
    assert_eq!(morale(&neighbor), 0);

    drop(outer);
    assert_eq!(morale(&neighbor), 5);
}

/// Sources registered and targets added during a suspension never apply
/// their effects until it ends.
#[test]
fn bindings_created_while_suspended_start_suspended() {
    let galaxy = Galaxy::new();
    let engine = galaxy.engine();
    garrison(&engine);

    let source = DynamicEntity::new::<Colony>();
    let early = DynamicEntity::new::<Colony>();
    galaxy.neighbors_of(&source).push(early.clone());

    let suspension = engine.suspend_effects();
    engine.register_source(&source).expect("register");
    assert_eq!(morale(&early), 0);

    let late = DynamicEntity::new::<Colony>();
    galaxy.neighbors_of(&source).push(late.clone());
    assert_eq!(morale(&late), 0);
    assert_eq!(
        states(&engine, &source),
        vec![EffectState::Suspended, EffectState::Suspended]
    );

    drop(suspension);
    assert_eq!(morale(&early), 5);
    assert_eq!(morale(&late), 5);
}

/// With `suspend_new_bindings` off, new bindings apply even during a suspension.
#[test]
fn new_bindings_can_bypass_suspension() {
    let galaxy = Galaxy::new();
    let engine = galaxy.engine_with(EngineConfig {
        suspend_new_bindings: false,
        ..EngineConfig::default()
    });
    garrison(&engine);

    let source = DynamicEntity::new::<Colony>();
    let existing = DynamicEntity::new::<Colony>();
    galaxy.neighbors_of(&source).push(existing.clone());
    engine.register_source(&source).expect("register");

    let suspension = engine.suspend_effects();
    let arrival = DynamicEntity::new::<Colony>();
    galaxy.neighbors_of(&source).push(arrival.clone());
    assert_eq!(morale(&existing), 0);
    assert_eq!(morale(&arrival), 5);

    drop(suspension);
    assert_eq!(morale(&existing), 5);
    assert_eq!(morale(&arrival), 5);
}

/// Detaching during a suspension leaves nothing behind when it ends.
#[test]
fn detach_while_suspended() {
    let galaxy = Galaxy::new();
    let engine = galaxy.engine();
    garrison(&engine);

    let source = DynamicEntity::new::<Colony>();
    let neighbor = DynamicEntity::new::<Colony>();
    galaxy.neighbors_of(&source).push(neighbor.clone());
    engine.register_source(&source).expect("register");

    let suspension = engine.suspend_effects();
    assert!(galaxy.neighbors_of(&source).remove(&neighbor));
    drop(suspension);

    assert_eq!(morale(&neighbor), 0);
    assert!(
        neighbor
            .get_value(&MORALE)
            .expect("cell")
            .modifiers()
            .is_empty()
    );
}
