//! Relay server binary.
//!
//! Configuration comes from `RELAY_CONFIG` (YAML) and `RELAY_*` environment
//! variables; log filtering from `RUST_LOG` (default `info`).

use anyhow::Context;
use llm_stream_relay::config::RelayConfig;
use llm_stream_relay::server::{router, AppState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = RelayConfig::load().context("failed to load relay configuration")?;
    if config.upstream.api_key.is_none() {
        warn!("no upstream API key configured; relay requests will fail with 500");
    }

    let listen_addr = config.listen_addr.clone();
    info!(
        listen_addr = %listen_addr,
        upstream = %config.upstream.endpoint(),
        proxy_path = %config.proxy.path,
        edge_path = %config.edge.path,
        "starting relay"
    );

    let state = AppState::new(config).context("failed to build upstream client")?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", listen_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
