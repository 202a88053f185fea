//! stag-server -- HTTP/WebSocket server for the STAG spatial service.
//!
//! Wires the store connection, migrations, spatial repository, session
//! hub, and axum router together, and owns the process lifecycle: serve
//! until SIGINT/SIGTERM, then drain with a 30 s grace period.

pub mod client;
pub mod config;
pub mod http;
pub mod hub;
pub mod middleware;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use stag_metrics::Metrics;
use stag_spatial::Repository;
use stag_store::{migrations, Connection};
use tokio::sync::watch;

use crate::config::Config;
use crate::http::AppState;
use crate::hub::Hub;

/// Service version reported by the health endpoint.
pub const VERSION: &str = "2.0.0";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Connect, migrate, and serve. Blocks until shutdown completes.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let metrics = Arc::new(Metrics::new().context("failed to build metrics registry")?);

    let store = Arc::new(
        Connection::connect(&config.store_config())
            .await
            .context("failed to connect to database")?,
    );
    migrations::migrate(&store)
        .await
        .context("failed to run migrations")?;

    let repository = Arc::new(Repository::new(store, metrics.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let (hub, hub_loop) = Hub::new(metrics.clone());
    tokio::spawn(hub_loop.run(shutdown_rx.clone()));

    let state = AppState {
        repository,
        hub,
        metrics,
        shutdown: shutdown_rx.clone(),
    };
    let app = http::router(state, &config.metrics);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "server listening");

    let mut serve_shutdown = shutdown_rx;
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = serve_shutdown.changed().await;
            })
            .await
    });

    tokio::select! {
        result = &mut server => {
            return result.context("server task panicked")?.context("server error");
        }
        _ = shutdown_signal() => {}
    }

    tracing::info!("shutting down server");
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(result) => result.context("server task panicked")?.context("server error")?,
        Err(_) => tracing::error!("graceful shutdown timed out"),
    }

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
