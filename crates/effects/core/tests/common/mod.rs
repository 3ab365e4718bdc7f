//! Shared fixtures for effects-core integration tests.
#![allow(dead_code)]

use std::sync::Once;

use effects_core::{Entity, EntityType};

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

pub struct MiningOutpost;
impl EntityType for MiningOutpost {
    const NAME: &'static str = "MiningOutpost";
    type Base = Outpost;
}

pub struct Starship;
impl EntityType for Starship {
    const NAME: &'static str = "Starship";
    type Base = Entity;
}
