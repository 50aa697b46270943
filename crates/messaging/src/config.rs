use domain::RetryPolicy;

/// Behaviour switches for message consumption.
#[derive(Debug, Clone)]
pub struct MessagingConfig {
    /// Drop redeliveries of messages already recorded in the inbox.
    pub dedup_enabled: bool,

    /// Release the successful lines of an order when another line fails.
    pub compensate_partial_orders: bool,

    /// Remove committed allocations when fulfillment reports shipment.
    /// When off, `FulfillmentCompleted` is acknowledged and ignored.
    pub prune_fulfilled_allocations: bool,

    /// Attempts per message for infrastructure failures before it is
    /// dead-lettered.
    pub delivery_retry: RetryPolicy,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            dedup_enabled: true,
            compensate_partial_orders: true,
            prune_fulfilled_allocations: true,
            delivery_retry: RetryPolicy::new(3),
        }
    }
}

impl MessagingConfig {
    pub fn with_dedup(mut self, enabled: bool) -> Self {
        self.dedup_enabled = enabled;
        self
    }

    pub fn with_compensation(mut self, enabled: bool) -> Self {
        self.compensate_partial_orders = enabled;
        self
    }

    pub fn with_fulfillment_pruning(mut self, enabled: bool) -> Self {
        self.prune_fulfilled_allocations = enabled;
        self
    }

    pub fn with_delivery_retry(mut self, retry: RetryPolicy) -> Self {
        self.delivery_retry = retry;
        self
    }
}
