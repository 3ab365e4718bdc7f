//! Runtime configuration for the property subsystem.
//!
//! Fixed limits live as associated constants; tunable parameters are plain
//! fields that can be loaded from a config file and then installed
//! process-wide with [`SystemConfig::install`].

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

static MAX_FOLD_PASSES: AtomicU32 = AtomicU32::new(SystemConfig::DEFAULT_MAX_FOLD_PASSES);

/// Tunable parameters for value cells.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Upper bound on modifier fold passes before a cell reports
    /// [`CellError::FoldDidNotConverge`](crate::CellError::FoldDidNotConverge).
    /// Values below 1 are treated as 1.
    pub max_fold_passes: u32,
}

impl SystemConfig {
    // ========================================================================
    // Fixed limits
    // ========================================================================

    /// Maximum number of registered properties (global indices are 16-bit).
    pub const MAX_PROPERTIES: usize = 65_535;

    /// Capacity of the inline small tier of a sparse slot map.
    pub const SMALL_TIER_CAPACITY: usize = 6;

    /// Capacity of the unsorted array tier.
    pub const ARRAY_TIER_CAPACITY: usize = 15;

    /// Capacity of the sorted array tier; larger maps switch to hashing.
    pub const SORTED_TIER_CAPACITY: usize = 128;

    pub const DEFAULT_MAX_FOLD_PASSES: u32 = 8;

    pub fn new() -> Self {
        Self {
            max_fold_passes: Self::DEFAULT_MAX_FOLD_PASSES,
        }
    }

    pub fn with_max_fold_passes(mut self, passes: u32) -> Self {
        self.max_fold_passes = passes.max(1);
        self
    }

    /// Makes this configuration the active one for every cell in the process.
    pub fn install(&self) {
        MAX_FOLD_PASSES.store(self.max_fold_passes.max(1), Ordering::Relaxed);
        tracing::debug!(
            target: "effects::config",
            max_fold_passes = self.max_fold_passes.max(1),
            "installed system config"
        );
    }

    /// Returns the active configuration.
    pub fn current() -> Self {
        Self {
            max_fold_passes: MAX_FOLD_PASSES.load(Ordering::Relaxed),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_passes_never_drop_below_one() {
        assert_eq!(SystemConfig::new().with_max_fold_passes(0).max_fold_passes, 1);
        assert_eq!(SystemConfig::default().max_fold_passes, 8);
    }

    #[test]
    fn tier_capacities_are_increasing() {
        assert!(SystemConfig::SMALL_TIER_CAPACITY < SystemConfig::ARRAY_TIER_CAPACITY);
        assert!(SystemConfig::ARRAY_TIER_CAPACITY < SystemConfig::SORTED_TIER_CAPACITY);
    }
}
