#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refharvest-runtime** – Process wiring for the reference harvesting
//! orchestrator: layered configuration, `AppContext` construction, and the
//! graceful-shutdown path that ties the health server and broker consumer
//! pool together.
//!
//! Grounded in `toka-orchestration-service/src/main.rs`'s shape (load
//! config, init logging, wire collaborators, race the HTTP server against a
//! signal handler) but generalised to this crate's own collaborator graph -
//! see `AppContext::build` for the wiring order §10 names explicitly:
//! `Config` → storage pool → cache client → broker connection → health
//! state → orchestrator → consumer pool.

mod config;
mod context;

pub use config::{BrokerSettings, Config};
pub use context::AppContext;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Install a `tracing-subscriber` pipeline honouring `RUST_LOG`, defaulting
/// to `info` when unset.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

/// Run the process to completion: serve the health HTTP surface and consume
/// the broker queue concurrently, until a SIGINT/SIGTERM is received, then
/// drain and close both.
pub async fn run(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let context = AppContext::build(config).await?;

    let health_state = refharvest_health::HealthState::new(context.consumer.health());
    let health_router = refharvest_health::router(health_state);
    let listener = tokio::net::TcpListener::bind(&context.health_bind_address).await?;
    info!(address = %context.health_bind_address, "health HTTP surface listening");

    let shutdown = CancellationToken::new();

    let health_shutdown = shutdown.clone();
    let health_server = tokio::spawn(async move {
        axum::serve(listener, health_router)
            .with_graceful_shutdown(async move { health_shutdown.cancelled().await })
            .await
    });

    let consumer_shutdown = shutdown.clone();
    let consumer = context.consumer;
    let consumer_task = tokio::spawn(async move {
        let result = consumer.run(consumer_shutdown).await;
        if let Err(err) = consumer.close().await {
            error!(?err, "error closing broker connection");
        }
        result
    });

    shutdown_signal().await;
    info!("shutdown signal received, draining");
    shutdown.cancel();

    match consumer_task.await {
        Ok(Err(err)) => error!(?err, "consumer pool exited with an error"),
        Err(join_err) => error!(?join_err, "consumer pool task panicked"),
        Ok(Ok(())) => {}
    }
    let _ = health_server.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
