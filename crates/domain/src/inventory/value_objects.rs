//! Value objects for the inventory domain.

use common::AggregateId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for reservation ids derived from an order line.
const RESERVATION_NAMESPACE: Uuid = Uuid::from_u128(0x3a9e_51c7_02d4_4f86_b1e5_97c2_6d08_fa41);

/// Stock keeping unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sku(String);

impl Sku {
    pub fn new(sku: impl Into<String>) -> Self {
        Self(sku.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Sku {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Sku {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Warehouse (stock location) identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WarehouseId(String);

impl WarehouseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WarehouseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WarehouseId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A SKU stocked at one warehouse: the identity of a `ProductInventory`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockLocation {
    pub sku: Sku,
    pub warehouse: WarehouseId,
}

impl StockLocation {
    pub fn new(sku: impl Into<Sku>, warehouse: impl Into<WarehouseId>) -> Self {
        Self {
            sku: sku.into(),
            warehouse: warehouse.into(),
        }
    }

    /// Stream id of the inventory aggregate for this location.
    ///
    /// Name-based, so every process derives the same id for the same pair.
    pub fn aggregate_id(&self) -> AggregateId {
        AggregateId::from_natural_key(super::ProductInventory::AGGREGATE_TYPE, &self.to_string())
    }
}

impl std::fmt::Display for StockLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.sku, self.warehouse)
    }
}

impl From<String> for Sku {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<String> for WarehouseId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
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

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Identifier of an order in the Ordering context.
    OrderId
);

uuid_id!(
    /// Identifier of a customer in the Ordering context.
    CustomerId
);

uuid_id!(
    /// Identifier of one reservation (one SKU line of one order).
    ReservationId
);

impl ReservationId {
    /// The reservation id for `sku` on `order_id`.
    ///
    /// Redelivered order messages therefore address the same reservation.
    pub fn for_order_line(order_id: OrderId, sku: &Sku) -> Self {
        let name = format!("{order_id}/{sku}");
        Self(Uuid::new_v5(&RESERVATION_NAMESPACE, name.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_id_is_stable() {
        let a = StockLocation::new("SKU-001", "WH-01");
        let b = StockLocation::new(Sku::new("SKU-001"), WarehouseId::new("WH-01"));

        assert_eq!(a.aggregate_id(), b.aggregate_id());
        assert_ne!(
            a.aggregate_id(),
            StockLocation::new("SKU-001", "WH-02").aggregate_id()
        );
        assert_eq!(a.to_string(), "SKU-001@WH-01");
    }

    #[test]
    fn reservation_id_per_order_line() {
        let order = OrderId::new();
        let sku = Sku::new("SKU-001");

        assert_eq!(
            ReservationId::for_order_line(order, &sku),
            ReservationId::for_order_line(order, &sku)
        );
        assert_ne!(
            ReservationId::for_order_line(order, &sku),
            ReservationId::for_order_line(order, &Sku::new("SKU-002"))
        );
        assert_ne!(
            ReservationId::for_order_line(order, &sku),
            ReservationId::for_order_line(OrderId::new(), &sku)
        );
    }

    #[test]
    fn ids_serialize_as_plain_uuids() {
        let id = ReservationId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
    }
}
