//! Stock levels read model: the three pools of every SKU at every warehouse.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{InventoryEvent, ProductInventory, Sku, StockLocation, WarehouseId};
use event_store::{EventEnvelope, Version};
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

/// Current stock of one SKU at one warehouse.
#[derive(Debug, Clone, PartialEq)]
pub struct StockLevel {
    pub location: StockLocation,
    pub available: u64,
    pub reserved: u64,
    pub committed: u64,
    /// Units that have left the warehouse.
    pub fulfilled: u64,
    pub version: Version,
    pub updated_at: DateTime<Utc>,
}

impl StockLevel {
    pub fn total_on_hand(&self) -> u64 {
        self.available + self.reserved + self.committed
    }
}

#[derive(Default)]
struct StockLevelsState {
    levels: HashMap<AggregateId, StockLevel>,
    position: ProjectionPosition,
}

/// Read model view for stock levels.
///
/// Mirrors the pools of every `ProductInventory` stream so that queries do
/// not have to replay aggregates.
#[derive(Clone, Default)]
pub struct StockLevelsView {
    state: Arc<RwLock<StockLevelsState>>,
}

impl StockLevelsView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, location: &StockLocation) -> Option<StockLevel> {
        self.state
            .read()
            .await
            .levels
            .get(&location.aggregate_id())
            .cloned()
    }

    pub async fn get_all(&self) -> Vec<StockLevel> {
        self.state.read().await.levels.values().cloned().collect()
    }

    /// Stock of one SKU across all warehouses.
    pub async fn for_sku(&self, sku: &Sku) -> Vec<StockLevel> {
        let state = self.state.read().await;
        let mut levels: Vec<_> = state
            .levels
            .values()
            .filter(|level| &level.location.sku == sku)
            .cloned()
            .collect();
        levels.sort_by(|a, b| a.location.warehouse.cmp(&b.location.warehouse));
        levels
    }

    pub async fn for_warehouse(&self, warehouse: &WarehouseId) -> Vec<StockLevel> {
        let state = self.state.read().await;
        let mut levels: Vec<_> = state
            .levels
            .values()
            .filter(|level| &level.location.warehouse == warehouse)
            .cloned()
            .collect();
        levels.sort_by(|a, b| a.location.sku.cmp(&b.location.sku));
        levels
    }

    /// Units of `sku` free for new reservations, summed over warehouses.
    pub async fn available_for_sku(&self, sku: &Sku) -> u64 {
        self.for_sku(sku).await.iter().map(|l| l.available).sum()
    }

    /// Locations whose available stock is at or below `threshold`, lowest first.
    pub async fn low_stock(&self, threshold: u64) -> Vec<StockLevel> {
        let state = self.state.read().await;
        let mut levels: Vec<_> = state
            .levels
            .values()
            .filter(|level| level.available <= threshold)
            .cloned()
            .collect();
        levels.sort_by_key(|level| level.available);
        levels
    }
}

#[async_trait]
impl Projection for StockLevelsView {
    fn name(&self) -> &'static str {
        "StockLevelsView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;
        state.position = state.position.advance(event.position);

        if event.aggregate_type != ProductInventory::AGGREGATE_TYPE {
            return Ok(());
        }

        let inventory_event: InventoryEvent = event.decode()?;

        if let InventoryEvent::InventoryInitialized(data) = &inventory_event {
            state.levels.insert(
                event.aggregate_id,
                StockLevel {
                    location: StockLocation::new(data.sku.clone(), data.warehouse.clone()),
                    available: u64::from(data.initial_quantity),
                    reserved: 0,
                    committed: 0,
                    fulfilled: 0,
                    version: event.version,
                    updated_at: event.recorded_at,
                },
            );
            return Ok(());
        }

        let Some(level) = state.levels.get_mut(&event.aggregate_id) else {
            tracing::warn!(
                aggregate_id = %event.aggregate_id,
                event_type = %event.event_type,
                "event for unknown inventory"
            );
            return Ok(());
        };

        match inventory_event {
            InventoryEvent::InventoryInitialized(_) => {}
            InventoryEvent::StockReceived(data) | InventoryEvent::StockRestocked(data) => {
                level.available += u64::from(data.quantity);
            }
            InventoryEvent::StockReserved(data) => {
                let quantity = u64::from(data.quantity);
                level.available = level.available.saturating_sub(quantity);
                level.reserved += quantity;
            }
            InventoryEvent::ReservationCommitted(data) => {
                let quantity = u64::from(data.quantity);
                level.reserved = level.reserved.saturating_sub(quantity);
                level.committed += quantity;
            }
            InventoryEvent::ReservationReleased(data) | InventoryEvent::ReservationExpired(data) => {
                let quantity = u64::from(data.quantity);
                level.reserved = level.reserved.saturating_sub(quantity);
                level.available += quantity;
            }
            InventoryEvent::AllocationFulfilled(data) => {
                let quantity = u64::from(data.quantity);
                level.committed = level.committed.saturating_sub(quantity);
                level.fulfilled += quantity;
            }
        }
        level.version = event.version;
        level.updated_at = event.recorded_at;

        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.levels.clear();
        state.position = ProjectionPosition::zero();
        Ok(())
    }
}

impl ReadModel for StockLevelsView {
    fn name(&self) -> &'static str {
        "StockLevelsView"
    }

    fn count(&self) -> usize {
        self.state.try_read().map(|s| s.levels.len()).unwrap_or(0)
    }
}
