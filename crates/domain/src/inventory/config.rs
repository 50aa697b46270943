use std::time::Duration;

use crate::retry::RetryPolicy;

/// Behaviour switches for [`super::InventoryService`].
#[derive(Debug, Clone)]
pub struct InventoryConfig {
    /// Lifetime of a soft hold. None keeps holds until commit or release.
    pub reservation_ttl: Option<Duration>,

    /// Replay the recorded outcome for a repeated idempotency key.
    pub idempotency_enabled: bool,

    /// Retry policy for version conflicts.
    pub command_retry: RetryPolicy,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: None,
            idempotency_enabled: true,
            command_retry: RetryPolicy::default(),
        }
    }
}

impl InventoryConfig {
    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = Some(ttl);
        self
    }

    pub fn with_idempotency(mut self, enabled: bool) -> Self {
        self.idempotency_enabled = enabled;
        self
    }

    pub fn with_command_retry(mut self, retry: RetryPolicy) -> Self {
        self.command_retry = retry;
        self
    }
}
