mod common;

use std::sync::Arc;

use common::{ADJACENT_COLONIES, Colony, Galaxy, MORALE, SHIELDS, morale};
use effects_core::{DynamicEntity, EffectsError, EntityType, ErrorSeverity, Modifier};
use effects_engine::{Effect, EffectGroup, EffectState, EngineError, WorkerPhase};

/// Derives from itself instead of the root entity type, so it never resolves.
struct Derelict;
impl EntityType for Derelict {
    const NAME: &'static str = "Derelict";
    type Base = Derelict;
}

/// One effect failing to detach does not keep the others attached.
#[test]
fn detach_failure_is_isolated() {
    let galaxy = Galaxy::new();
    let engine = galaxy.engine();
    engine
        .register_group(
            EffectGroup::for_source::<Colony>("Bastion", ADJACENT_COLONIES)
                .with_effect(Effect::offset(SHIELDS.clone(), "5"))
                .with_effect(Effect::offset(MORALE.clone(), "5")),
        )
        .expect("register group");

    let source = DynamicEntity::new::<Colony>();
    let target = DynamicEntity::new::<Colony>();
    galaxy.neighbors_of(&source).push(target.clone());
    engine.register_source(&source).expect("register");

    let group_binding = Arc::clone(&engine.group_bindings(&source)[0]);
    let bindings = group_binding.bindings_for(&target);
    let shields_modifier = bindings[0].modifier_id().expect("attached");
    assert_eq!(morale(&target), 5);

    // Sabotage the shields cell so that any recompute diverges.
    let shields = target.get_value(&SHIELDS).expect("cell");
    let weak = Arc::downgrade(&shields);
    let saboteur = Modifier::new(move |_: &i64, current: &i64| {
        if let Some(cell) = weak.upgrade() {
            let _ = cell.add_modifier(Modifier::new(|_: &i64, c: &i64| *c));
        }
        *current
    });
    assert!(shields.add_modifier(saboteur).is_err());

    assert!(galaxy.neighbors_of(&source).remove(&target));

    assert!(group_binding.attached_targets().is_empty());
    assert!(bindings.iter().all(|b| b.state() == EffectState::Detached));
    assert_eq!(morale(&target), 0);
    assert!(
        shields
            .modifiers()
            .iter()
            .all(|modifier| modifier.id() != shields_modifier)
    );
}

/// An effect whose value expression is unknown fails alone; its siblings attach.
#[test]
fn attach_failure_is_isolated() {
    let galaxy = Galaxy::new();
    let engine = galaxy.engine();
    engine
        .register_group(
            EffectGroup::for_source::<Colony>("Misprint", ADJACENT_COLONIES)
                .with_effect(Effect::offset(SHIELDS.clone(), "no such expression"))
                .with_effect(Effect::offset(MORALE.clone(), "5")),
        )
        .expect("register group");

    let source = DynamicEntity::new::<Colony>();
    let target = DynamicEntity::new::<Colony>();
    galaxy.neighbors_of(&source).push(target.clone());
    engine.register_source(&source).expect("register");

    let bindings = engine.group_bindings(&source)[0].bindings_for(&target);
    assert_eq!(bindings.len(), 2);
    assert_eq!(bindings[0].state(), EffectState::Detached);
    assert_eq!(bindings[1].state(), EffectState::Attached);
    assert_eq!(morale(&target), 5);

    // A later detach cleans up the successful binding and ignores the failed one.
    assert!(galaxy.neighbors_of(&source).remove(&target));
    assert_eq!(morale(&target), 0);
}

/// A group whose scope cannot be evaluated is logged and skipped; other groups
/// of the same source still activate.
#[test]
fn activation_failure_does_not_block_registration() {
    let galaxy = Galaxy::new();
    let engine = galaxy.engine();
    engine
        .register_group(EffectGroup::for_source::<Colony>("Broken", "source.Nowhere"))
        .expect("register broken group");
    engine
        .register_group(
            EffectGroup::for_source::<Colony>("Working", ADJACENT_COLONIES)
                .with_effect(Effect::offset(MORALE.clone(), "5")),
        )
        .expect("register working group");

    let source = DynamicEntity::new::<Colony>();
    let target = DynamicEntity::new::<Colony>();
    galaxy.neighbors_of(&source).push(target.clone());

    assert_eq!(engine.register_source(&source).expect("register"), 2);
    assert_eq!(
        engine.worker_phase(&source, "Broken"),
        Some(WorkerPhase::Inactive)
    );
    assert_eq!(
        engine.worker_phase(&source, "Working"),
        Some(WorkerPhase::Active)
    );
    assert_eq!(morale(&target), 5);
}

/// A numeric scope is a configuration error.
#[test]
fn scope_of_the_wrong_kind_is_rejected() {
    let galaxy = Galaxy::new();
    galaxy.evaluator.define_constant("42", 42);
    let engine = galaxy.engine();
    engine
        .register_group(EffectGroup::for_source::<Colony>("Numeric", "42"))
        .expect("register group");

    let source = DynamicEntity::new::<Colony>();
    engine.register_source(&source).expect("register");
    assert_eq!(
        engine.worker_phase(&source, "Numeric"),
        Some(WorkerPhase::Inactive)
    );

    let error = EngineError::UnexpectedValue {
        code: "42".to_owned(),
        expected: "entity or entities",
        found: "int",
    };
    assert_eq!(error.severity(), ErrorSeverity::Configuration);
    assert_eq!(error.error_code(), "SCRIPT_UNEXPECTED_VALUE");
    assert!(!error.severity().is_recoverable());
}

/// A group whose source type cannot be resolved is rejected without being kept,
/// so later sources never pick it up.
#[test]
fn rejected_group_is_not_registered() {
    let galaxy = Galaxy::new();
    let engine = galaxy.engine();

    let first = DynamicEntity::new::<Colony>();
    assert_eq!(engine.register_source(&first).expect("register first"), 0);

    let error = engine
        .register_group(
            EffectGroup::for_source::<Derelict>("Salvage", ADJACENT_COLONIES)
                .with_effect(Effect::offset(MORALE.clone(), "5")),
        )
        .expect_err("detached source type");
    assert_eq!(error.error_code(), "TYPE_DETACHED_HIERARCHY");
    assert!(engine.groups().iter().all(|group| group.name() != "Salvage"));
    assert!(engine.group_bindings(&first).is_empty());

    let second = DynamicEntity::new::<Colony>();
    let neighbor = DynamicEntity::new::<Colony>();
    galaxy.neighbors_of(&second).push(neighbor.clone());
    assert_eq!(engine.register_source(&second).expect("register second"), 0);
    assert!(engine.group_bindings(&second).is_empty());
    assert_eq!(engine.worker_phase(&second, "Salvage"), None);
    assert_eq!(morale(&neighbor), 0);
}
