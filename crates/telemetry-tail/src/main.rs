//! Telemetry tail: prints the sweep engine's Redis telemetry as it arrives.

mod config;
mod format;
mod subscriber;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::TailConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignore if missing).
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let config = TailConfig::from_env().context("failed to load tail config")?;
    info!(
        redis_url = %config.redis_url,
        channel = %config.channel,
        events = ?config.events,
        color = config.color,
        "telemetry tail starting"
    );

    let shutdown = CancellationToken::new();
    let sub_shutdown = shutdown.clone();
    let sub_config = config.clone();
    let mut handle = tokio::spawn(async move { subscriber::run(&sub_config, sub_shutdown).await });

    let finished = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for Ctrl+C")?;
            None
        }
        res = &mut handle => Some(res),
    };
    let result = match finished {
        Some(res) => res,
        None => {
            info!("shutdown signal received");
            shutdown.cancel();
            handle.await
        }
    };

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "subscriber exited with error"),
        Err(e) => error!(error = %e, "subscriber task panicked"),
    }
    Ok(())
}
