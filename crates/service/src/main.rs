//! Service entry point.

use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use inventory_service::config::{Config, LogFormat};
use inventory_service::error::{Result, ServiceError};
use inventory_service::{InventoryNode, create_app};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    }
    .map_err(|e| ServiceError::Logging(e.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;

    match config.database_url.clone() {
        Some(url) => {
            let store = PostgresEventStore::connect(&url).await?;
            tracing::info!("using PostgreSQL event store");
            run(store, config, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, events are kept in memory");
            run(InMemoryEventStore::new(), config, metrics_handle).await
        }
    }
}

async fn run<S>(store: S, config: Config, metrics_handle: PrometheusHandle) -> Result<()>
where
    S: EventStore + Clone + 'static,
{
    let node = InventoryNode::new(store, &config);

    let replayed = node.projections.run_catch_up().await?;
    tracing::info!(events = replayed, "projections caught up");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = node.spawn_workers(shutdown_rx);

    let app = create_app(node.health_probe(), metrics_handle);
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "serving health and metrics");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if shutdown_tx.send(true).is_err() {
        tracing::debug!("workers already stopped");
    }
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "worker terminated abnormally");
        }
    }

    tracing::info!("service shut down gracefully");
    Ok(())
}
