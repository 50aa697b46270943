//! Inventory commands.

use chrono::{DateTime, Utc};
use common::AggregateId;

use crate::command::Command;

use super::{OrderId, ProductInventory, ReservationId, StockLocation};

/// Creates the inventory of a SKU at a warehouse.
#[derive(Debug, Clone)]
pub struct InitializeInventory {
    pub location: StockLocation,
    pub initial_quantity: u32,
}

impl InitializeInventory {
    pub fn new(location: StockLocation, initial_quantity: u32) -> Self {
        Self {
            location,
            initial_quantity,
        }
    }
}

/// Adds a supplier delivery to available stock.
#[derive(Debug, Clone)]
pub struct ReceiveStock {
    pub location: StockLocation,
    pub quantity: u32,
}

impl ReceiveStock {
    pub fn new(location: StockLocation, quantity: u32) -> Self {
        Self { location, quantity }
    }
}

/// Puts returned or recounted stock back on the shelf.
#[derive(Debug, Clone)]
pub struct Restock {
    pub location: StockLocation,
    pub quantity: u32,
}

impl Restock {
    pub fn new(location: StockLocation, quantity: u32) -> Self {
        Self { location, quantity }
    }
}

/// Places a soft hold for one order line.
#[derive(Debug, Clone)]
pub struct ReserveStock {
    pub reservation_id: ReservationId,
    pub order_id: OrderId,
    pub location: StockLocation,
    pub quantity: u32,
}

impl ReserveStock {
    pub fn new(
        reservation_id: ReservationId,
        order_id: OrderId,
        location: StockLocation,
        quantity: u32,
    ) -> Self {
        Self {
            reservation_id,
            order_id,
            location,
            quantity,
        }
    }

    /// Reservation for an order line, with the id derived from `(order, sku)`.
    pub fn for_order_line(order_id: OrderId, location: StockLocation, quantity: u32) -> Self {
        let reservation_id = ReservationId::for_order_line(order_id, &location.sku);
        Self::new(reservation_id, order_id, location, quantity)
    }
}

/// Turns a soft hold into a hard allocation.
#[derive(Debug, Clone)]
pub struct CommitReservation {
    pub reservation_id: ReservationId,
    pub location: StockLocation,
}

impl CommitReservation {
    pub fn new(reservation_id: ReservationId, location: StockLocation) -> Self {
        Self {
            reservation_id,
            location,
        }
    }
}

/// Returns a soft hold to available stock.
#[derive(Debug, Clone)]
pub struct ReleaseReservation {
    pub reservation_id: ReservationId,
    pub location: StockLocation,
}

impl ReleaseReservation {
    pub fn new(reservation_id: ReservationId, location: StockLocation) -> Self {
        Self {
            reservation_id,
            location,
        }
    }
}

/// Expires every soft hold at the location that is due at `now`.
#[derive(Debug, Clone)]
pub struct ExpireReservations {
    pub location: StockLocation,
    pub now: DateTime<Utc>,
}

impl ExpireReservations {
    pub fn new(location: StockLocation, now: DateTime<Utc>) -> Self {
        Self { location, now }
    }
}

/// Drops a hard allocation once the goods have shipped.
#[derive(Debug, Clone)]
pub struct FulfillAllocation {
    pub reservation_id: ReservationId,
    pub location: StockLocation,
}

impl FulfillAllocation {
    pub fn new(reservation_id: ReservationId, location: StockLocation) -> Self {
        Self {
            reservation_id,
            location,
        }
    }
}

macro_rules! inventory_command {
    ($($command:ty),+ $(,)?) => {
        $(
            impl Command for $command {
                type Aggregate = ProductInventory;

                fn aggregate_id(&self) -> AggregateId {
                    self.location.aggregate_id()
                }
            }
        )+
    };
}

inventory_command!(
    InitializeInventory,
    ReceiveStock,
    Restock,
    ReserveStock,
    CommitReservation,
    ReleaseReservation,
    ExpireReservations,
    FulfillAllocation,
);
