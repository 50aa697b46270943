use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

use crate::{AggregateId, Version};

/// Serialized aggregate state at a given stream version.
///
/// `schema_version` identifies the layout of `state`. Loaders discard
/// snapshots whose schema differs from the one they understand and replay
/// the full stream instead.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub version: Version,
    pub schema_version: u32,
    pub taken_at: DateTime<Utc>,
    pub state: serde_json::Value,
}

impl Snapshot {
    /// Serializes `state` into a new snapshot.
    pub fn capture<T: Serialize>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        schema_version: u32,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            schema_version,
            taken_at: Utc::now(),
            state: serde_json::to_value(state)?,
        })
    }

    /// Deserializes the state if it was written with `schema_version`.
    ///
    /// Returns `Ok(None)` for a snapshot of a different schema.
    pub fn restore<T: DeserializeOwned>(
        &self,
        schema_version: u32,
    ) -> Result<Option<T>, serde_json::Error> {
        if self.schema_version != schema_version {
            return Ok(None);
        }
        T::deserialize(&self.state).map(Some)
    }
}
