//! Read model views over the inventory streams.

pub mod reservations;
pub mod stock_levels;

pub use reservations::{ReservationRecord, ReservationsView};
pub use stock_levels::{StockLevel, StockLevelsView};
