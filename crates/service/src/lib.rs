//! Inventory service: the Inventory context's message consumer, expiry
//! sweeper and projections, wired to one event store.
//!
//! The HTTP surface is operational only: `/health` and `/metrics`.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use domain::InventoryService;
use event_store::EventStore;
use messaging::{
    Envelope, ExpirySweeper, InMemoryDeadLetterQueue, InMemoryInbox, InMemoryMessageBus,
    InboundMessage, InventoryMessageHandler, MessageConsumer, OrderPlacedHandler,
    OutboundMessage, SingleWarehouseSelector,
};
use metrics_exporter_prometheus::PrometheusHandle;
use projections::{ProjectionProcessor, ReservationsView, StockLevelsView};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::Config;

pub type InboundBus = InMemoryMessageBus<Envelope<InboundMessage>>;
pub type OutboundBus = InMemoryMessageBus<Envelope<OutboundMessage>>;
pub type Consumer<S> = MessageConsumer<InventoryMessageHandler<S, OutboundBus>>;

const PROJECTION_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Read-only handles the health endpoint reports on.
#[derive(Clone)]
pub struct HealthProbe {
    pub stock_levels: StockLevelsView,
    pub reservations: ReservationsView,
    pub dead_letters: InMemoryDeadLetterQueue,
}

/// One service instance.
pub struct InventoryNode<S: EventStore> {
    pub inventory: Arc<InventoryService<S>>,
    pub consumer: Arc<Consumer<S>>,
    pub sweeper: Arc<ExpirySweeper<S, OutboundBus>>,
    pub projections: Arc<ProjectionProcessor<S>>,
    pub stock_levels: StockLevelsView,
    pub reservations: ReservationsView,
    /// Inbound transport; a broker adapter feeds it.
    pub inbound: InboundBus,
    pub outbound: OutboundBus,
    pub dead_letters: InMemoryDeadLetterQueue,
    sweep_interval: Duration,
}

impl<S: EventStore + Clone + 'static> InventoryNode<S> {
    pub fn new(store: S, config: &Config) -> Self {
        let messaging_config = config.messaging_config();
        let inventory = Arc::new(InventoryService::with_config(
            store.clone(),
            config.inventory_config(),
        ));

        let inbound = InboundBus::default();
        let outbound = OutboundBus::default();
        let dead_letters = InMemoryDeadLetterQueue::new();

        let orders = OrderPlacedHandler::new(
            store.clone(),
            inventory.clone(),
            outbound.clone(),
            Arc::new(SingleWarehouseSelector::new(config.default_warehouse.as_str())),
            messaging_config.clone(),
        );
        let handler = InventoryMessageHandler::new(
            inventory.clone(),
            orders,
            outbound.clone(),
            messaging_config.clone(),
        );
        let consumer = Arc::new(MessageConsumer::new(
            handler,
            Arc::new(InMemoryInbox::new()),
            Arc::new(dead_letters.clone()),
            messaging_config,
        ));
        let sweeper = Arc::new(ExpirySweeper::new(inventory.clone(), outbound.clone()));

        let stock_levels = StockLevelsView::new();
        let reservations = ReservationsView::new();
        let mut processor = ProjectionProcessor::new(store);
        processor.register(Arc::new(stock_levels.clone()));
        processor.register(Arc::new(reservations.clone()));

        Self {
            inventory,
            consumer,
            sweeper,
            projections: Arc::new(processor),
            stock_levels,
            reservations,
            inbound,
            outbound,
            dead_letters,
            sweep_interval: config.expiry_sweep_interval,
        }
    }

    pub fn health_probe(&self) -> HealthProbe {
        HealthProbe {
            stock_levels: self.stock_levels.clone(),
            reservations: self.reservations.clone(),
            dead_letters: self.dead_letters.clone(),
        }
    }

    /// Starts the consumer, the expiry sweeper and the projection follower.
    /// Each stops once `shutdown` flips to true.
    pub fn spawn_workers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let consumer = self.consumer.clone();
        let messages = self.inbound.subscribe();
        let consumer_shutdown = shutdown.clone();

        let sweeper = self.sweeper.clone();
        let sweep_interval = self.sweep_interval;
        let sweeper_shutdown = shutdown.clone();

        let processor = self.projections.clone();

        vec![
            tokio::spawn(async move { consumer.run(messages, consumer_shutdown).await }),
            tokio::spawn(async move { sweeper.run(sweep_interval, sweeper_shutdown).await }),
            tokio::spawn(follow_projections(processor, PROJECTION_POLL_INTERVAL, shutdown)),
        ]
    }
}

/// Keeps the projections caught up with the store.
async fn follow_projections<S: EventStore>(
    processor: Arc<ProjectionProcessor<S>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = processor.run_catch_up().await {
                    tracing::error!(error = %e, "projection catch-up failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("projection follower stopped");
}

/// Creates the router of the operational endpoints.
pub fn create_app(probe: HealthProbe, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health))
        .with_state(probe)
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
}
