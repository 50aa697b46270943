use chrono::{DateTime, Utc};

use crate::{AggregateId, EventEnvelope, GlobalPosition, Version};

/// Filter over stored events.
///
/// Unset fields match everything. Results are always returned in global
/// position order.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub aggregate_id: Option<AggregateId>,
    pub aggregate_type: Option<String>,
    /// Matches any of these event types.
    pub event_types: Option<Vec<String>>,
    /// Inclusive lower version bound.
    pub from_version: Option<Version>,
    /// Inclusive upper version bound.
    pub to_version: Option<Version>,
    /// Inclusive lower bound on `recorded_at`.
    pub recorded_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `recorded_at`.
    pub recorded_before: Option<DateTime<Utc>>,
    /// Exclusive lower bound on global position.
    pub after_position: Option<GlobalPosition>,
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_aggregate(aggregate_id: AggregateId) -> Self {
        Self::new().aggregate_id(aggregate_id)
    }

    pub fn for_aggregate_type(aggregate_type: impl Into<String>) -> Self {
        Self::new().aggregate_type(aggregate_type)
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Adds an event type to the accepted set.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types
            .get_or_insert_with(Vec::new)
            .push(event_type.into());
        self
    }

    pub fn from_version(mut self, version: Version) -> Self {
        self.from_version = Some(version);
        self
    }

    pub fn to_version(mut self, version: Version) -> Self {
        self.to_version = Some(version);
        self
    }

    pub fn recorded_after(mut self, timestamp: DateTime<Utc>) -> Self {
        self.recorded_after = Some(timestamp);
        self
    }

    pub fn recorded_before(mut self, timestamp: DateTime<Utc>) -> Self {
        self.recorded_before = Some(timestamp);
        self
    }

    pub fn after_position(mut self, position: GlobalPosition) -> Self {
        self.after_position = Some(position);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true when `event` passes every filter (ignores `limit`).
    pub fn matches(&self, event: &EventEnvelope) -> bool {
        self.aggregate_id.is_none_or(|id| event.aggregate_id == id)
            && self
                .aggregate_type
                .as_deref()
                .is_none_or(|t| event.aggregate_type == t)
            && self
                .event_types
                .as_ref()
                .is_none_or(|types| types.iter().any(|t| *t == event.event_type))
            && self.from_version.is_none_or(|v| event.version >= v)
            && self.to_version.is_none_or(|v| event.version <= v)
            && self.recorded_after.is_none_or(|t| event.recorded_at >= t)
            && self.recorded_before.is_none_or(|t| event.recorded_at <= t)
            && self.after_position.is_none_or(|p| event.position > p)
    }
}
