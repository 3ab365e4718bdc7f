//! Error types surfaced by the effect engine.
use thiserror::Error;

use effects_core::{CellError, CoreError, EffectsError, EntityId, ErrorSeverity};

use crate::script::ScriptError;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Cell(#[from] CellError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("effect group `{group}` is already attached to target {target}")]
    TargetAlreadyAttached { group: String, target: EntityId },

    #[error("expression `{code}` produced {found}, expected {expected}")]
    UnexpectedValue {
        code: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl EffectsError for EngineError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Core(inner) => inner.severity(),
            Self::Cell(inner) => inner.severity(),
            Self::Script(_) => ErrorSeverity::Configuration,
            Self::TargetAlreadyAttached { .. } => ErrorSeverity::Invariant,
            Self::UnexpectedValue { .. } => ErrorSeverity::Configuration,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Core(inner) => inner.error_code(),
            Self::Cell(inner) => inner.error_code(),
            Self::Script(_) => "SCRIPT_EVALUATION",
            Self::TargetAlreadyAttached { .. } => "BINDING_ALREADY_ATTACHED",
            Self::UnexpectedValue { .. } => "SCRIPT_UNEXPECTED_VALUE",
        }
    }
}
