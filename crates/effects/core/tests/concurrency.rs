mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{Colony, init_tracing};
use effects_core::{
    DynamicEntity, EntityType, PropertyDefinition, TypeRegistry, TypeToken,
};

const THREADS: usize = 8;

/// Resolved by nobody but `racing_resolves_share_one_entry`.
struct Lighthouse;
impl EntityType for Lighthouse {
    const NAME: &'static str = "Lighthouse";
    type Base = Colony;
}

/// Resolved by nobody but `racing_cell_creation_yields_one_cell`.
struct Harbor;
impl EntityType for Harbor {
    const NAME: &'static str = "Harbor";
    type Base = Colony;
}

/// Runs `task` on every thread at once and collects the results.
fn race<T: Send>(task: impl Fn() -> T + Sync) -> Vec<T> {
    let barrier = Barrier::new(THREADS);
    thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    task()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread panicked"))
            .collect()
    })
}

/// Threads resolving a brand new type all get the same entry and id.
#[test]
fn racing_resolves_share_one_entry() {
    init_tracing();
    let entries = race(|| {
        TypeRegistry::global()
            .resolve(TypeToken::of::<Lighthouse>())
            .expect("resolve")
    });

    let first = &entries[0];
    for entry in &entries {
        assert!(Arc::ptr_eq(first, entry));
        assert_eq!(entry.id(), first.id());
    }
    let by_name = TypeRegistry::global()
        .find_by_name("Lighthouse")
        .expect("registered once");
    assert!(Arc::ptr_eq(first, &by_name));
}

/// Threads asking one entity for the same property share a single cell.
#[test]
fn racing_cell_creation_yields_one_cell() {
    init_tracing();
    let beacons = PropertyDefinition::<i64>::register("Beacons", TypeToken::of::<Harbor>())
        .expect("register");
    let harbor = DynamicEntity::new::<Harbor>();

    let cells = race(|| harbor.get_value(&beacons).expect("cell"));

    let first = &cells[0];
    assert!(cells.iter().all(|cell| Arc::ptr_eq(first, cell)));
    assert_eq!(harbor.property_count(), 1);

    first.set_base_value(7).expect("set base");
    assert_eq!(harbor.current_value(&beacons).expect("current"), 7);
}
