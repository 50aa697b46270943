//! Core projection trait and position tracking.

use async_trait::async_trait;
use event_store::{EventEnvelope, GlobalPosition};

use crate::Result;

/// How far a projection has read the global log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionPosition {
    /// Number of events handled since the last reset.
    pub events_processed: u64,

    /// Global position of the last handled event.
    pub last_position: GlobalPosition,
}

impl ProjectionPosition {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Position after handling the event at `position`.
    pub fn advance(&self, position: GlobalPosition) -> Self {
        Self {
            events_processed: self.events_processed + 1,
            last_position: position,
        }
    }

    /// True if the event at `position` has not been handled yet.
    pub fn is_behind(&self, position: GlobalPosition) -> bool {
        self.last_position < position
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "position({} at {})",
            self.events_processed, self.last_position
        )
    }
}

/// A projection that processes events and updates a read model.
///
/// Events arrive in global position order. Events from other aggregate
/// types must still advance the position.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Handles a single event, updating the projection's read model.
    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    async fn position(&self) -> ProjectionPosition;

    /// Clears the read model and rewinds to the start of the log.
    async fn reset(&self) -> Result<()>;
}
