//! Redis pub/sub loop for the telemetry channel.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TailConfig;
use crate::format::{self, Envelope};

/// Subscribe and print until shutdown, reconnecting after any failure.
pub async fn run(config: &TailConfig, shutdown: CancellationToken) -> Result<()> {
    let client = redis::Client::open(config.redis_url.as_str()).context("invalid Redis URL")?;
    let delay = Duration::from_secs(config.reconnect_delay_secs.max(1));

    loop {
        match listen(&client, config, &shutdown).await {
            Ok(()) => break,
            Err(e) => {
                warn!(
                    error = %e,
                    next_retry_secs = delay.as_secs(),
                    "telemetry subscription lost, reconnecting"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    Ok(())
}

/// `Ok` only on shutdown.
async fn listen(client: &redis::Client, config: &TailConfig, shutdown: &CancellationToken) -> Result<()> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .context("failed to connect to Redis")?;
    pubsub
        .subscribe(&config.channel)
        .await
        .with_context(|| format!("failed to subscribe to {}", config.channel))?;
    info!(channel = %config.channel, "subscribed to telemetry");

    let mut messages = pubsub.on_message();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            msg = messages.next() => {
                let Some(msg) = msg else {
                    anyhow::bail!("pub/sub stream ended");
                };
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        debug!(error = %e, "non-text payload skipped");
                        continue;
                    }
                };
                match serde_json::from_str::<Envelope>(&payload) {
                    Ok(envelope) if config.wants(&envelope.event) => {
                        println!("{}", format::render(&envelope, config.color));
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "undecodable telemetry payload"),
                }
            }
        }
    }
}
