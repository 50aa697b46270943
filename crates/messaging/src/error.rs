//! Messaging error types.

use domain::DomainError;
use event_store::EventStoreError;
use thiserror::Error;

use crate::allocation::AllocationState;

/// Errors that can occur while consuming or publishing integration messages.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The transport refused or lost an outbound message.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// An allocation event does not fit the allocation's state.
    #[error("Allocation is {actual}, cannot {operation}")]
    InvalidAllocationState {
        operation: &'static str,
        actual: AllocationState,
    },
}

impl MessagingError {
    /// True when redelivering the same message later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            MessagingError::Domain(e) => e.is_transient(),
            MessagingError::EventStore(_) | MessagingError::Publish(_) => true,
            MessagingError::Serialization(_) | MessagingError::InvalidAllocationState { .. } => {
                false
            }
        }
    }
}

/// Convenience type alias for messaging results.
pub type Result<T> = std::result::Result<T, MessagingError>;
