//! Operational endpoints.

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::HealthProbe;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Inventory locations known to the stock-levels view.
    pub stock_locations: usize,
    /// Soft holds currently live according to the reservations view.
    pub active_reservations: usize,
    /// Messages parked in the dead-letter queue.
    pub dead_letters: usize,
}

/// GET /health
pub async fn health(State(probe): State<HealthProbe>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        stock_locations: probe.stock_levels.get_all().await.len(),
        active_reservations: probe.reservations.active_count().await,
        dead_letters: probe.dead_letters.len().await,
    })
}

/// GET /metrics, in the Prometheus text format.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
