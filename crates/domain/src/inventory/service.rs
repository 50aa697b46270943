//! Inventory service: the command handlers of the Inventory context.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use common::AggregateId;
use event_store::EventStore;

use crate::command::{Command, CommandContext, CommandHandler, CommandResult};
use crate::error::DomainError;

use super::idempotency::KeyLocks;
use super::{
    CommitReservation, ExpireReservations, FulfillAllocation, IdempotencyStore,
    InMemoryIdempotencyStore, InitializeInventory, InventoryConfig, InventoryError,
    InventoryEvent, ProductInventory, ReceiveStock, RecordedOutcome, ReleaseReservation,
    ReserveStock, Restock, StockLocation,
};

type InventoryResult = Result<CommandResult<ProductInventory>, DomainError>;

/// Service for managing product inventories.
///
/// Wraps the command handler with the retry policy, idempotency replay and
/// metrics of the Inventory context.
pub struct InventoryService<S: EventStore> {
    handler: CommandHandler<S, ProductInventory>,
    config: InventoryConfig,
    idempotency: Arc<dyn IdempotencyStore>,
    key_locks: KeyLocks,
}

impl<S: EventStore> InventoryService<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, InventoryConfig::default())
    }

    pub fn with_config(store: S, config: InventoryConfig) -> Self {
        Self {
            handler: CommandHandler::new(store).with_retry_policy(config.command_retry),
            config,
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            key_locks: KeyLocks::default(),
        }
    }

    /// Replaces the default in-process outcome cache.
    pub fn with_idempotency_store(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency = store;
        self
    }

    pub fn handler(&self) -> &CommandHandler<S, ProductInventory> {
        &self.handler
    }

    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }

    #[tracing::instrument(skip(self, ctx), fields(location = %cmd.location))]
    pub async fn initialize_inventory(
        &self,
        cmd: InitializeInventory,
        ctx: &CommandContext,
    ) -> InventoryResult {
        let location = cmd.location.clone();
        let initial_quantity = cmd.initial_quantity;

        self.run(cmd.aggregate_id(), ctx, |inventory| {
            inventory.initialize(&location, initial_quantity)
        })
        .await
    }

    #[tracing::instrument(skip(self, ctx), fields(location = %cmd.location))]
    pub async fn receive_stock(&self, cmd: ReceiveStock, ctx: &CommandContext) -> InventoryResult {
        let quantity = cmd.quantity;
        self.run(cmd.aggregate_id(), ctx, |inventory| inventory.receive(quantity))
            .await
    }

    #[tracing::instrument(skip(self, ctx), fields(location = %cmd.location))]
    pub async fn restock(&self, cmd: Restock, ctx: &CommandContext) -> InventoryResult {
        let quantity = cmd.quantity;
        self.run(cmd.aggregate_id(), ctx, |inventory| inventory.restock(quantity))
            .await
    }

    /// Places a soft hold. With a reservation TTL configured the hold
    /// expires that long after now.
    #[tracing::instrument(
        skip(self, ctx),
        fields(location = %cmd.location, reservation_id = %cmd.reservation_id)
    )]
    pub async fn reserve_stock(&self, cmd: ReserveStock, ctx: &CommandContext) -> InventoryResult {
        let expires_at = self
            .config
            .reservation_ttl
            .and_then(|ttl| TimeDelta::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl);

        let result = self
            .run(cmd.aggregate_id(), ctx, |inventory| {
                inventory.reserve(cmd.reservation_id, cmd.order_id, cmd.quantity, expires_at)
            })
            .await;

        match &result {
            Ok(r) if r.replayed => {}
            Ok(_) => {
                metrics::counter!("inventory_reservations_total").increment(1);
                metrics::counter!("inventory_reserved_units_total")
                    .increment(u64::from(cmd.quantity));
            }
            Err(DomainError::Inventory(e)) => {
                metrics::counter!("inventory_reservation_failures_total", "reason" => e.code())
                    .increment(1);
                tracing::info!(reason = e.code(), "reservation rejected");
            }
            Err(e) => tracing::error!(error = %e, "reservation failed"),
        }

        result
    }

    #[tracing::instrument(
        skip(self, ctx),
        fields(location = %cmd.location, reservation_id = %cmd.reservation_id)
    )]
    pub async fn commit_reservation(
        &self,
        cmd: CommitReservation,
        ctx: &CommandContext,
    ) -> InventoryResult {
        let reservation_id = cmd.reservation_id;
        self.run(cmd.aggregate_id(), ctx, |inventory| inventory.commit(reservation_id))
            .await
    }

    #[tracing::instrument(
        skip(self, ctx),
        fields(location = %cmd.location, reservation_id = %cmd.reservation_id)
    )]
    pub async fn release_reservation(
        &self,
        cmd: ReleaseReservation,
        ctx: &CommandContext,
    ) -> InventoryResult {
        let reservation_id = cmd.reservation_id;
        self.run(cmd.aggregate_id(), ctx, |inventory| inventory.release(reservation_id))
            .await
    }

    #[tracing::instrument(skip(self, ctx), fields(location = %cmd.location))]
    pub async fn expire_reservations(
        &self,
        cmd: ExpireReservations,
        ctx: &CommandContext,
    ) -> InventoryResult {
        let now = cmd.now;
        let result = self
            .run(cmd.aggregate_id(), ctx, |inventory| {
                inventory.expire_reservations(now)
            })
            .await?;

        if !result.events.is_empty() {
            metrics::counter!("inventory_reservations_expired_total")
                .increment(result.events.len() as u64);
            tracing::info!(expired = result.events.len(), "reservations expired");
        }
        Ok(result)
    }

    #[tracing::instrument(
        skip(self, ctx),
        fields(location = %cmd.location, reservation_id = %cmd.reservation_id)
    )]
    pub async fn fulfill_allocation(
        &self,
        cmd: FulfillAllocation,
        ctx: &CommandContext,
    ) -> InventoryResult {
        let reservation_id = cmd.reservation_id;
        self.run(cmd.aggregate_id(), ctx, |inventory| inventory.fulfill(reservation_id))
            .await
    }

    /// Current state of the inventory at `location`, if it was initialized.
    pub async fn get_inventory(
        &self,
        location: &StockLocation,
    ) -> Result<Option<ProductInventory>, DomainError> {
        self.handler.load_existing(location.aggregate_id()).await
    }

    pub async fn get_inventory_by_id(
        &self,
        id: AggregateId,
    ) -> Result<Option<ProductInventory>, DomainError> {
        self.handler.load_existing(id).await
    }

    /// Stream ids of every initialized inventory.
    pub async fn inventory_ids(&self) -> Result<Vec<AggregateId>, DomainError> {
        Ok(self
            .handler
            .store()
            .list_streams(ProductInventory::AGGREGATE_TYPE)
            .await?)
    }

    /// Executes a command, replaying the recorded outcome when the context
    /// carries an idempotency key that has been seen before. Commands sharing
    /// a key run one at a time.
    async fn run<F>(&self, aggregate_id: AggregateId, ctx: &CommandContext, command_fn: F) -> InventoryResult
    where
        F: Fn(&ProductInventory) -> Result<Vec<InventoryEvent>, InventoryError>,
    {
        let key = ctx
            .idempotency_key
            .as_deref()
            .filter(|_| self.config.idempotency_enabled);

        let Some(key) = key else {
            return self
                .handler
                .execute_with(aggregate_id, ctx.metadata(), command_fn)
                .await;
        };

        let guard = self.key_locks.acquire(key).await;
        let result = self.run_keyed(aggregate_id, ctx, key, command_fn).await;
        self.key_locks.release(key, guard).await;
        result
    }

    async fn run_keyed<F>(
        &self,
        aggregate_id: AggregateId,
        ctx: &CommandContext,
        key: &str,
        command_fn: F,
    ) -> InventoryResult
    where
        F: Fn(&ProductInventory) -> Result<Vec<InventoryEvent>, InventoryError>,
    {
        if let Some(outcome) = self.idempotency.get(key).await {
            tracing::debug!(key, "replaying recorded outcome");
            metrics::counter!("inventory_idempotent_replays_total").increment(1);
            return match outcome {
                RecordedOutcome::Accepted {
                    events, version, ..
                } => Ok(CommandResult {
                    aggregate: self.handler.load(aggregate_id).await?,
                    events,
                    new_version: version,
                    replayed: true,
                }),
                RecordedOutcome::Rejected { error, .. } => Err(error.into()),
            };
        }

        let result = self
            .handler
            .execute_with(aggregate_id, ctx.metadata(), command_fn)
            .await;

        match &result {
            Ok(r) => {
                self.idempotency
                    .record(key, RecordedOutcome::accepted(r.events.clone(), r.new_version))
                    .await
            }
            Err(DomainError::Inventory(e)) => {
                self.idempotency
                    .record(key, RecordedOutcome::rejected(e.clone()))
                    .await
            }
            Err(_) => {}
        }

        result
    }
}
