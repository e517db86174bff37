//! Inflow: multi-source event ingestion and pattern dispatch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use inflow_core::{load_dotenv, Config};
use inflow_server::{build, AppConfig, AppState, EngineConsumer};

#[derive(Parser)]
#[command(name = "inflow", about = "Event ingestion and dispatch engine")]
struct Cli {
    /// Path to the source/binding topology file.
    #[arg(long, env = "INFLOW_CONFIG", default_value = "inflow.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    let app = AppConfig::load(&cli.config)?;
    let (manager, engine) = build(&config, app).await?;

    manager
        .start_all(Arc::new(EngineConsumer::new(engine.clone())))
        .context("cannot start ingestion")?;

    let state = AppState::new(manager.clone(), engine);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(addr = %addr, "api listening");

    axum::serve(listener, inflow_server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let killed = manager.stop_all(Duration::from_secs(10)).await;
    if !killed.is_empty() {
        warn!(sources = ?killed, "sources force-killed during shutdown");
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c");
    }
    info!("shutdown signal received");
}
