//! Gateway binary: configuration discovery, tracing setup, serve loop

use anyhow::Context;
use flouds_config::GatewayConfig;
use flouds_gateway::{build_gateway, spawn_maintenance};
use flouds_vector::MilvusConnector;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::discover().context("configuration loading failed")?;
    init_tracing(&config)?;
    flouds_gateway::bootstrap::log_startup(&config);

    let connector = Arc::new(MilvusConnector::new(
        Duration::from_secs(config.timeouts.request_secs),
        Duration::from_secs(config.timeouts.admin_secs),
        config.database.db_name.clone(),
    ));
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let shutdown_grace = Duration::from_secs(config.pool.shutdown_grace_secs);

    let gateway = build_gateway(config, connector)
        .await
        .context("gateway bootstrap failed")?;
    let maintenance = spawn_maintenance(&gateway.state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("cannot bind {bind_addr}"))?;
    info!(addr = %bind_addr, "Listening");

    axum::serve(listener, gateway.router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutting down");
    maintenance.stop().await;
    gateway.state.pool.close(shutdown_grace).await;
    Ok(())
}

fn init_tracing(config: &GatewayConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.logging.path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {path}"))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
