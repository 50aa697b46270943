use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for name-based aggregate identifiers.
///
/// Changing this value re-keys every stream derived through
/// [`AggregateId::from_natural_key`], so it is fixed forever.
const AGGREGATE_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a3e_9b4d_4c7a_8e21_5d0f_a7b3_c914);

/// Identity of one event stream.
///
/// Random ids suit process instances; aggregates whose identity comes from
/// business data (a SKU at a warehouse) use [`AggregateId::from_natural_key`]
/// so that every node derives the same stream without a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

impl AggregateId {
    /// Creates a new random aggregate ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derives a stable ID from a kind tag and a business key.
    ///
    /// The same `(kind, key)` pair always yields the same ID.
    pub fn from_natural_key(kind: &str, key: &str) -> Self {
        let name = format!("{kind}/{key}");
        Self(Uuid::new_v5(&AGGREGATE_NAMESPACE, name.as_bytes()))
    }

    /// Creates an aggregate ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AggregateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<AggregateId> for Uuid {
    fn from(id: AggregateId) -> Self {
        id.0
    }
}

/// Ties together every event and message caused by one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_unique() {
        assert_ne!(AggregateId::new(), AggregateId::new());
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }

    #[test]
    fn natural_key_is_deterministic() {
        let a = AggregateId::from_natural_key("ProductInventory", "SKU-001@WH-01");
        let b = AggregateId::from_natural_key("ProductInventory", "SKU-001@WH-01");
        assert_eq!(a, b);
    }

    #[test]
    fn natural_key_separates_kinds_and_keys() {
        let inventory = AggregateId::from_natural_key("ProductInventory", "SKU-001@WH-01");
        let other_wh = AggregateId::from_natural_key("ProductInventory", "SKU-001@WH-02");
        let other_kind = AggregateId::from_natural_key("OrderAllocation", "SKU-001@WH-01");
        assert_ne!(inventory, other_wh);
        assert_ne!(inventory, other_kind);
    }

    #[test]
    fn aggregate_id_serializes_as_plain_uuid() {
        let id = AggregateId::from_natural_key("ProductInventory", "SKU-9@WH-9");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
        let back: AggregateId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
