//! Entity snapshots.
//!
//! Only base values are persisted: modifiers and derived values belong to the
//! effect bindings that produced them and are rebuilt after a restore. Each
//! record is keyed by (owner type name, property name) so snapshots survive
//! changes in registration order; base values are bincode-encoded.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::error::SnapshotError;

/// Persisted base values of one entity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub properties: Vec<PropertyRecord>,
}

/// One property's persisted base value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub owner: String,
    pub name: String,
    pub base_value: Vec<u8>,
}

impl EntitySnapshot {
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn find(&self, owner: &str, name: &str) -> Option<&PropertyRecord> {
        self.properties
            .iter()
            .find(|record| record.owner == owner && record.name == name)
    }

    /// Encodes the whole snapshot with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        bincode::serialize(self).map_err(|e| SnapshotError::Encode {
            property: "<snapshot>".into(),
            message: e.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        bincode::deserialize(bytes).map_err(|e| SnapshotError::Decode {
            property: "<snapshot>".into(),
            message: e.to_string(),
        })
    }
}

pub(crate) fn encode_value<T: Serialize>(property: &str, value: &T) -> Result<Vec<u8>, SnapshotError> {
    bincode::serialize(value).map_err(|e| SnapshotError::Encode {
        property: property.to_owned(),
        message: e.to_string(),
    })
}

pub(crate) fn decode_value<T: DeserializeOwned>(
    property: &str,
    bytes: &[u8],
) -> Result<T, SnapshotError> {
    bincode::deserialize(bytes).map_err(|e| SnapshotError::Decode {
        property: property.to_owned(),
        message: e.to_string(),
    })
}
