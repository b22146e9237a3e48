//! pulse-hub server entry point.
//!
//! Starts the hub and serves the WebSocket, SSE and health endpoints until
//! Ctrl-C or SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use pulse_hub::api;
use pulse_hub::app_state::AppState;
use pulse_hub::broker::{Broker, MemoryBroker};
use pulse_hub::config::{BrokerKind, HubConfig, LogFormat};
use pulse_hub::service::Hub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = HubConfig::from_env().context("invalid LISTEN_ADDR")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(addr = %config.listen_addr, broker = ?config.broker, "starting pulse-hub");

    // Build broker and hub
    let broker = build_broker(&config).await?;
    let listen_addr = config.listen_addr;
    let hub = Hub::start(config, broker).await;

    // Build router
    let app = api::build_router(AppState::new(hub.clone()));

    // Start server
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    tracing::info!(addr = %listen_addr, "server listening");

    let signal_hub = hub.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Ends every open WebSocket and SSE stream so the server can drain.
            signal_hub.shutdown().await;
        })
        .await
        .context("server error")?;

    hub.shutdown().await;
    tracing::info!("pulse-hub stopped");
    Ok(())
}

async fn build_broker(config: &HubConfig) -> anyhow::Result<Arc<dyn Broker>> {
    match config.broker {
        BrokerKind::Memory => Ok(Arc::new(MemoryBroker::default())),
        #[cfg(feature = "redis")]
        BrokerKind::Redis => {
            let broker = pulse_hub::broker::RedisBroker::connect(&config.redis_url)
                .await
                .with_context(|| format!("failed to connect to {}", config.redis_url))?;
            Ok(Arc::new(broker))
        }
        #[cfg(not(feature = "redis"))]
        BrokerKind::Redis => {
            anyhow::bail!("BROKER=redis requires building with the `redis` feature")
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
