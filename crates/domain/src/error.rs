//! Domain error types.

use common::AggregateId;
use event_store::EventStoreError;
use thiserror::Error;

use crate::inventory::InventoryError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The aggregate rejected the command.
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Every attempt of the read-decide-append cycle lost a race.
    #[error("Gave up on aggregate {aggregate_id} after {attempts} conflicting attempts")]
    RetriesExhausted {
        aggregate_id: AggregateId,
        attempts: u32,
    },
}

impl DomainError {
    /// The business rejection, if this is one.
    pub fn as_inventory(&self) -> Option<&InventoryError> {
        match self {
            DomainError::Inventory(e) => Some(e),
            _ => None,
        }
    }

    /// True for failures of the infrastructure rather than of the command:
    /// retrying the same input later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DomainError::EventStore(_) | DomainError::RetriesExhausted { .. }
        )
    }
}

/// Convenience type alias for domain results.
pub type Result<T> = std::result::Result<T, DomainError>;
