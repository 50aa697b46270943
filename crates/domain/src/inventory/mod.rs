//! ProductInventory aggregate and related types.

mod aggregate;
mod commands;
mod config;
mod events;
mod idempotency;
mod reservation;
mod service;
mod value_objects;

pub use aggregate::ProductInventory;
pub use commands::*;
pub use config::InventoryConfig;
pub use events::{
    InventoryEvent, InventoryInitializedData, ReservationData, StockAddedData, StockReservedData,
};
pub use idempotency::{IdempotencyStore, InMemoryIdempotencyStore, RecordedOutcome};
pub use reservation::ReservationStatus;
pub use service::InventoryService;
pub use value_objects::{CustomerId, OrderId, ReservationId, Sku, StockLocation, WarehouseId};

use thiserror::Error;

/// Commands the inventory refuses, given its current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    /// Business rejection: not enough free stock.
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u32 },

    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    #[error("Reservation already committed: {0}")]
    AlreadyCommitted(ReservationId),

    #[error("Inventory already exists for {0}")]
    AlreadyExists(StockLocation),

    #[error("Invalid quantity: {quantity}")]
    InvalidQuantity { quantity: u32 },

    #[error("Reservation already exists: {0}")]
    DuplicateReservation(ReservationId),

    #[error("Inventory has not been initialized")]
    InventoryNotInitialized,
}

impl InventoryError {
    /// Stable machine-readable code, used as a metric label and as the
    /// reason on outbound failure messages.
    pub fn code(&self) -> &'static str {
        match self {
            InventoryError::InsufficientStock { .. } => "insufficient_stock",
            InventoryError::ReservationNotFound(_) => "reservation_not_found",
            InventoryError::AlreadyCommitted(_) => "already_committed",
            InventoryError::AlreadyExists(_) => "already_exists",
            InventoryError::InvalidQuantity { .. } => "invalid_quantity",
            InventoryError::DuplicateReservation(_) => "duplicate_reservation",
            InventoryError::InventoryNotInitialized => "inventory_not_initialized",
        }
    }
}
