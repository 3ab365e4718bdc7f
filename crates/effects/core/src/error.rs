//! Common error infrastructure for effects-core.
//!
//! Each subsystem owns a focused error enum (`SlotMapError`, `RegistryError`,
//! `PropertyError`, `CellError`, `SnapshotError`). [`CoreError`] wraps them for
//! entity-level operations that can fail in more than one subsystem.
//!
//! All error types implement [`EffectsError`], which classifies a failure by
//! [`ErrorSeverity`] and exposes a stable machine-readable code.

use thiserror::Error;

/// Severity level of an error, used for categorization and recovery strategies.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorSeverity {
    /// Invalid registration or configuration; the caller must change its input.
    ///
    /// Examples: duplicate property name, default value rejected by the validator
    Configuration,

    /// An internal invariant was violated.
    ///
    /// Examples: storage promotion into a tier that cannot hold the entries,
    /// a cell stored under the wrong value type
    Invariant,

    /// Transient condition; the operation may succeed later.
    ///
    /// Examples: base value written while the cell is recomputing
    Recoverable,
}

impl ErrorSeverity {
    /// Returns a human-readable description of this severity level.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Invariant => "invariant",
            Self::Recoverable => "recoverable",
        }
    }

    /// Returns true if this error is potentially recoverable.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable)
    }
}

/// Common interface implemented by every error in the effects crates.
pub trait EffectsError: core::fmt::Display + core::fmt::Debug {
    /// Returns the severity classification for this error.
    fn severity(&self) -> ErrorSeverity;

    /// Returns a stable error code for logging and metrics.
    fn error_code(&self) -> &'static str;
}

/// Errors raised by [`SparseSlotMap`](crate::SparseSlotMap).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SlotMapError {
    #[error("index {index} is out of range for a map of {len} entries")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("cannot promote {from} store ({len} entries) into {to} store: target map too small")]
    PromotionTargetTooSmall {
        from: &'static str,
        to: &'static str,
        len: usize,
    },
}

impl EffectsError for SlotMapError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::IndexOutOfRange { .. } | Self::PromotionTargetTooSmall { .. } => {
                ErrorSeverity::Invariant
            }
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::IndexOutOfRange { .. } => "SLOT_INDEX_OUT_OF_RANGE",
            Self::PromotionTargetTooSmall { .. } => "SLOT_PROMOTION_TOO_SMALL",
        }
    }
}

/// Errors raised while resolving entity types.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("entity type `{type_name}` has a cyclic base chain")]
    CyclicHierarchy { type_name: &'static str },

    #[error("entity type `{type_name}` does not derive from the root entity type")]
    DetachedHierarchy { type_name: &'static str },

    #[error("entity type name `{name}` is already used by a different type")]
    DuplicateTypeName { name: &'static str },
}

impl EffectsError for RegistryError {
    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Configuration
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::CyclicHierarchy { .. } => "TYPE_CYCLIC_HIERARCHY",
            Self::DetachedHierarchy { .. } => "TYPE_DETACHED_HIERARCHY",
            Self::DuplicateTypeName { .. } => "TYPE_DUPLICATE_NAME",
        }
    }
}

/// Errors raised by property registration and metadata overrides.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PropertyError {
    #[error("property name must not be empty")]
    EmptyName,

    #[error("property `{owner}.{name}` is already registered")]
    AlreadyRegistered { owner: &'static str, name: String },

    #[error("cannot register `{owner}.{name}`: the property limit has been reached")]
    LimitExceeded { owner: &'static str, name: String },

    #[error("default value for `{owner}.{name}` is rejected by the property validator")]
    InvalidDefaultValue { owner: &'static str, name: String },

    #[error("metadata for `{name}` is already registered for type `{for_type}`")]
    MetadataAlreadyRegistered { name: String, for_type: &'static str },

    #[error("cannot override `{owner}.{name}` for `{for_type}`: type does not derive from the owner")]
    IncompatibleOverride {
        owner: &'static str,
        name: String,
        for_type: &'static str,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl EffectsError for PropertyError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::LimitExceeded { .. } => ErrorSeverity::Invariant,
            Self::Registry(inner) => inner.severity(),
            _ => ErrorSeverity::Configuration,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyName => "PROPERTY_EMPTY_NAME",
            Self::AlreadyRegistered { .. } => "PROPERTY_ALREADY_REGISTERED",
            Self::LimitExceeded { .. } => "PROPERTY_LIMIT_EXCEEDED",
            Self::InvalidDefaultValue { .. } => "PROPERTY_INVALID_DEFAULT",
            Self::MetadataAlreadyRegistered { .. } => "PROPERTY_METADATA_REGISTERED",
            Self::IncompatibleOverride { .. } => "PROPERTY_INCOMPATIBLE_OVERRIDE",
            Self::Registry(inner) => inner.error_code(),
        }
    }
}

/// Errors raised by a single property value cell.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CellError {
    #[error("base value of `{property}` cannot change while its value is being recomputed")]
    ReentrantBaseValueWrite { property: String },

    #[error("modifier set of `{property}` kept changing after {passes} fold passes")]
    FoldDidNotConverge { property: String, passes: u32 },

    #[error("value for `{property}` is rejected by the property validator")]
    InvalidValue { property: String },
}

impl EffectsError for CellError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ReentrantBaseValueWrite { .. } => ErrorSeverity::Invariant,
            Self::FoldDidNotConverge { .. } => ErrorSeverity::Configuration,
            Self::InvalidValue { .. } => ErrorSeverity::Recoverable,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::ReentrantBaseValueWrite { .. } => "CELL_REENTRANT_WRITE",
            Self::FoldDidNotConverge { .. } => "CELL_FOLD_DIVERGED",
            Self::InvalidValue { .. } => "CELL_INVALID_VALUE",
        }
    }
}

/// Errors raised while encoding or decoding entity snapshots.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("failed to encode `{property}`: {message}")]
    Encode { property: String, message: String },

    #[error("failed to decode `{property}`: {message}")]
    Decode { property: String, message: String },
}

impl EffectsError for SnapshotError {
    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Recoverable
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Encode { .. } => "SNAPSHOT_ENCODE",
            Self::Decode { .. } => "SNAPSHOT_DECODE",
        }
    }
}

/// Umbrella error for entity-level operations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error(transparent)]
    SlotMap(#[from] SlotMapError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error(transparent)]
    Cell(#[from] CellError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("value cell for `{property}` holds a different value type")]
    TypeMismatch { property: String },
}

impl EffectsError for CoreError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::SlotMap(e) => e.severity(),
            Self::Registry(e) => e.severity(),
            Self::Property(e) => e.severity(),
            Self::Cell(e) => e.severity(),
            Self::Snapshot(e) => e.severity(),
            Self::TypeMismatch { .. } => ErrorSeverity::Invariant,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::SlotMap(e) => e.error_code(),
            Self::Registry(e) => e.error_code(),
            Self::Property(e) => e.error_code(),
            Self::Cell(e) => e.error_code(),
            Self::Snapshot(e) => e.error_code(),
            Self::TypeMismatch { .. } => "CELL_TYPE_MISMATCH",
        }
    }
}

/// Result alias for entity-level operations.
pub type Result<T, E = CoreError> = core::result::Result<T, E>;
