//! Integration tests for the assembled service.

use std::sync::OnceLock;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::{CommandContext, InitializeInventory, OrderId, Sku, StockLocation};
use event_store::InMemoryEventStore;
use inventory_service::config::Config;
use inventory_service::{InventoryNode, create_app};
use messaging::{Envelope, InboundMessage, OrderLine, OrderPlaced, OutboundMessage};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::watch;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn node_with_stock(stock: u32) -> InventoryNode<InMemoryEventStore> {
    let node = InventoryNode::new(InMemoryEventStore::new(), &Config::default());
    node.inventory
        .initialize_inventory(
            InitializeInventory::new(StockLocation::new("SKU-001", "WH-01"), stock),
            &CommandContext::new(),
        )
        .await
        .unwrap();
    node
}

async fn get_json(app: axum::Router, uri: &str) -> serde_json::Value {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_reports_views_and_dead_letters() {
    let node = node_with_stock(10).await;
    node.projections.run_catch_up().await.unwrap();

    let app = create_app(node.health_probe(), metrics_handle());
    let json = get_json(app, "/health").await;

    assert_eq!(json["status"], "ok");
    assert_eq!(json["stock_locations"], 1);
    assert_eq!(json["active_reservations"], 0);
    assert_eq!(json["dead_letters"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let node = node_with_stock(1).await;
    let app = create_app(node.health_probe(), metrics_handle());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_workers_process_inbound_orders() {
    let node = node_with_stock(10).await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = node.spawn_workers(shutdown_rx);

    let order_id = OrderId::new();
    node.inbound
        .send(Envelope::new(InboundMessage::OrderPlaced(OrderPlaced {
            order_id,
            customer_id: domain::CustomerId::new(),
            lines: vec![OrderLine::new("SKU-001", 3)],
        })))
        .unwrap();

    let confirmed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(OutboundMessage::ReservationConfirmed(c)) =
                node.outbound.published_payloads().into_iter().next()
            {
                return c;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no confirmation published");

    assert_eq!(confirmed.order_id, order_id);
    assert_eq!(confirmed.quantity, 3);

    node.projections.run_catch_up().await.unwrap();
    assert_eq!(node.stock_levels.available_for_sku(&Sku::new("SKU-001")).await, 7);
    assert_eq!(node.reservations.for_order(order_id).await.len(), 1);

    shutdown_tx.send(true).unwrap();
    for worker in workers {
        worker.await.unwrap();
    }
}
