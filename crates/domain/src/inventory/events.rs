//! Inventory domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{OrderId, ReservationId, Sku, StockLocation, WarehouseId};

/// Events recorded in a `ProductInventory` stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InventoryEvent {
    /// The SKU was first stocked at the warehouse.
    InventoryInitialized(InventoryInitializedData),

    /// A delivery from a supplier arrived.
    StockReceived(StockAddedData),

    /// Stock was put back on the shelf (returns, recounts).
    StockRestocked(StockAddedData),

    /// Stock moved from available to a soft hold.
    StockReserved(StockReservedData),

    /// A soft hold became a hard allocation.
    ReservationCommitted(ReservationData),

    /// A soft hold was returned to available stock.
    ReservationReleased(ReservationData),

    /// A soft hold outlived its time-to-live and was returned to available stock.
    ReservationExpired(ReservationData),

    /// A hard allocation physically left the warehouse.
    AllocationFulfilled(ReservationData),
}

impl DomainEvent for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::InventoryInitialized(_) => "InventoryInitialized",
            InventoryEvent::StockReceived(_) => "StockReceived",
            InventoryEvent::StockRestocked(_) => "StockRestocked",
            InventoryEvent::StockReserved(_) => "StockReserved",
            InventoryEvent::ReservationCommitted(_) => "ReservationCommitted",
            InventoryEvent::ReservationReleased(_) => "ReservationReleased",
            InventoryEvent::ReservationExpired(_) => "ReservationExpired",
            InventoryEvent::AllocationFulfilled(_) => "AllocationFulfilled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryInitializedData {
    pub inventory_id: AggregateId,
    pub sku: Sku,
    pub warehouse: WarehouseId,
    pub initial_quantity: u32,
    pub initialized_at: DateTime<Utc>,
}

/// Data for StockReceived and StockRestocked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAddedData {
    pub quantity: u32,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockReservedData {
    pub reservation_id: ReservationId,
    pub order_id: OrderId,
    pub quantity: u32,
    pub reserved_at: DateTime<Utc>,
    /// Only set when reservations have a time-to-live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Data for the lifecycle events of an existing reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationData {
    pub reservation_id: ReservationId,
    pub order_id: OrderId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

impl InventoryEvent {
    pub fn inventory_initialized(location: &StockLocation, initial_quantity: u32) -> Self {
        InventoryEvent::InventoryInitialized(InventoryInitializedData {
            inventory_id: location.aggregate_id(),
            sku: location.sku.clone(),
            warehouse: location.warehouse.clone(),
            initial_quantity,
            initialized_at: Utc::now(),
        })
    }

    pub fn stock_received(quantity: u32) -> Self {
        InventoryEvent::StockReceived(StockAddedData {
            quantity,
            added_at: Utc::now(),
        })
    }

    pub fn stock_restocked(quantity: u32) -> Self {
        InventoryEvent::StockRestocked(StockAddedData {
            quantity,
            added_at: Utc::now(),
        })
    }

    pub fn stock_reserved(
        reservation_id: ReservationId,
        order_id: OrderId,
        quantity: u32,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        InventoryEvent::StockReserved(StockReservedData {
            reservation_id,
            order_id,
            quantity,
            reserved_at: Utc::now(),
            expires_at,
        })
    }

    pub fn reservation_committed(
        reservation_id: ReservationId,
        order_id: OrderId,
        quantity: u32,
    ) -> Self {
        InventoryEvent::ReservationCommitted(ReservationData::now(reservation_id, order_id, quantity))
    }

    pub fn reservation_released(
        reservation_id: ReservationId,
        order_id: OrderId,
        quantity: u32,
    ) -> Self {
        InventoryEvent::ReservationReleased(ReservationData::now(reservation_id, order_id, quantity))
    }

    /// Stamped with the sweep time rather than the wall clock.
    pub fn reservation_expired(
        reservation_id: ReservationId,
        order_id: OrderId,
        quantity: u32,
        expired_at: DateTime<Utc>,
    ) -> Self {
        InventoryEvent::ReservationExpired(ReservationData {
            reservation_id,
            order_id,
            quantity,
            occurred_at: expired_at,
        })
    }

    pub fn allocation_fulfilled(
        reservation_id: ReservationId,
        order_id: OrderId,
        quantity: u32,
    ) -> Self {
        InventoryEvent::AllocationFulfilled(ReservationData::now(reservation_id, order_id, quantity))
    }

    /// The reservation this event concerns, if any.
    pub fn reservation_id(&self) -> Option<ReservationId> {
        match self {
            InventoryEvent::StockReserved(data) => Some(data.reservation_id),
            InventoryEvent::ReservationCommitted(data)
            | InventoryEvent::ReservationReleased(data)
            | InventoryEvent::ReservationExpired(data)
            | InventoryEvent::AllocationFulfilled(data) => Some(data.reservation_id),
            InventoryEvent::InventoryInitialized(_)
            | InventoryEvent::StockReceived(_)
            | InventoryEvent::StockRestocked(_) => None,
        }
    }
}

impl ReservationData {
    fn now(reservation_id: ReservationId, order_id: OrderId, quantity: u32) -> Self {
        Self {
            reservation_id,
            order_id,
            quantity,
            occurred_at: Utc::now(),
        }
    }
}
