//! Domain layer of the inventory reservation service.
//!
//! This crate provides:
//! - Aggregate and DomainEvent traits for event-sourced entities
//! - CommandHandler, which loads, decides and appends with optimistic
//!   concurrency and retries on version conflicts
//! - The ProductInventory aggregate with its two-phase reservation rules
//! - InventoryService, the command handlers of the Inventory context

pub mod aggregate;
pub mod command;
pub mod error;
pub mod inventory;
pub mod retry;

pub use aggregate::{Aggregate, DomainEvent, SnapshotCapable};
pub use command::{Command, CommandContext, CommandHandler, CommandResult};
pub use error::DomainError;
pub use inventory::{
    CommitReservation, CustomerId, ExpireReservations, FulfillAllocation, IdempotencyStore,
    InMemoryIdempotencyStore, InitializeInventory, InventoryConfig, InventoryError,
    InventoryEvent, InventoryService, OrderId, ProductInventory, ReceiveStock, RecordedOutcome,
    ReleaseReservation, ReservationId, ReservationStatus, ReserveStock, Restock, Sku,
    StockLocation, WarehouseId,
};
pub use retry::RetryPolicy;
