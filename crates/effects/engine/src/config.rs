//! Engine configuration loader.

use std::path::Path;

use effects_core::SystemConfig;
use serde::{Deserialize, Serialize};

/// Common result type for configuration loading.
pub type LoadResult<T> = anyhow::Result<T>;

/// Behavior switches for an [`EffectEngine`](crate::EffectEngine).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Activate workers as soon as sources register.
    pub enabled_on_start: bool,
    /// Bindings attached while the engine is suspended start out suspended.
    pub suspend_new_bindings: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled_on_start: true,
            suspend_new_bindings: true,
        }
    }
}

/// Combined configuration file layout.
///
/// ```toml
/// [system]
/// max_fold_passes = 8
///
/// [engine]
/// enabled_on_start = true
/// suspend_new_bindings = true
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    pub system: SystemConfig,
    pub engine: EngineConfig,
}

impl EffectsConfig {
    pub fn from_toml_str(content: &str) -> LoadResult<Self> {
        toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse effects config TOML: {}", e))
    }

    /// Load config data from a TOML file.
    pub fn load(path: &Path) -> LoadResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read file {}: {}", path.display(), e))?;
        Self::from_toml_str(&content)
    }

    /// Installs the system section process-wide and returns the engine section.
    pub fn install(self) -> EngineConfig {
        self.system.install();
        self.engine
    }
}
