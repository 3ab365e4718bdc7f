mod common;

use std::io::Write;

use effects_core::SystemConfig;
use effects_engine::{EffectsConfig, EngineConfig};

/// A config file on disk loads both sections and installs the system part.
#[test]
fn loads_config_from_file() {
    common::init_tracing();
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        "[system]\nmax_fold_passes = 3\n\n[engine]\nsuspend_new_bindings = false\n"
    )
    .expect("write config");

    let config = EffectsConfig::load(file.path()).expect("load config");
    assert_eq!(config.system.max_fold_passes, 3);
    assert_eq!(
        config.engine,
        EngineConfig {
            enabled_on_start: true,
            suspend_new_bindings: false,
        }
    );

    let engine_config = config.install();
    assert_eq!(SystemConfig::current().max_fold_passes, 3);
    assert!(!engine_config.suspend_new_bindings);
}

#[test]
fn missing_file_is_reported() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("effects.toml");

    let error = EffectsConfig::load(&path).expect_err("no such file");
    assert!(error.to_string().contains("Failed to read file"));
}
