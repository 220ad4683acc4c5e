#![allow(async_fn_in_trait)]

mod buffer;
mod config;
mod engine;
mod error;
mod probe;
mod reading;
mod remote;
mod sensor;

use crate::buffer::ReadingSpool;
use crate::config::Config;
use crate::engine::Engine;
use crate::probe::HttpProbe;
use crate::remote::MysqlStore;
use crate::sensor::SoilProbe;
use anyhow::{Context, Result};
use tokio::sync::mpsc;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,soil_agent=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let spool = ReadingSpool::open(&config.spool_path, config.spool_capacity)
        .with_context(|| format!("spool storage unusable at {}", config.spool_path.display()))?;
    let store = MysqlStore::connect_lazy(&config.database_url, config.db_timeout)
        .context("invalid DATABASE_URL")?;
    let probe = HttpProbe::new(config.probe_urls.clone(), config.probe_timeout)?;
    let sensor = SoilProbe::new(&config);

    tracing::info!(
        machine_id = %config.machine_id,
        interval = ?config.interval,
        spool = %config.spool_path.display(),
        "soil agent starting"
    );

    let engine = Engine::new(sensor, probe, store.clone(), store, spool, config.interval);

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown signal received");
                let _ = shutdown_tx.send(()).await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
                // Keep the sender alive so a closed channel is not mistaken
                // for a stop request.
                std::future::pending::<()>().await;
            }
        }
    });

    engine.run(shutdown_rx).await;
    tracing::info!("soil agent stopped");
    Ok(())
}
