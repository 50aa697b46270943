//! Projection error types.

use event_store::GlobalPosition;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// An inventory event payload did not match the current event schema.
    #[error("Undecodable event payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// A view stopped at an event it could not apply. Catch-up resumes from
    /// the same event on the next run.
    #[error("{projection} halted at {position}: {source}")]
    Halted {
        projection: &'static str,
        position: GlobalPosition,
        #[source]
        source: Box<ProjectionError>,
    },
}

pub type Result<T> = std::result::Result<T, ProjectionError>;
