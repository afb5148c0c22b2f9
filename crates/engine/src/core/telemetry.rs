//! Fire-and-forget telemetry over Redis pub/sub.
//!
//! The hot path only calls [`Telemetry::publish`], which is a non-blocking
//! `try_send` into a bounded queue. A background task drains the queue and
//! `PUBLISH`es each envelope as JSON:
//!
//! ```json
//! {"event": "SIGNAL_GEN", "timestamp_ms": 1700000000000, "data": {...}}
//! ```
//!
//! A full queue, a dead connection or a failed publish drops the event.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::REDIS_IO_TIMEOUT_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TelemetryEvent {
    MarketPulse,
    LevelUpdate,
    SignalGen,
    TradeUpdate,
}

impl TelemetryEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarketPulse => "MARKET_PULSE",
            Self::LevelUpdate => "LEVEL_UPDATE",
            Self::SignalGen => "SIGNAL_GEN",
            Self::TradeUpdate => "TRADE_UPDATE",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub event: TelemetryEvent,
    pub timestamp_ms: i64,
    pub data: Value,
}

/// Cheap, cloneable publish handle.
#[derive(Clone, Default)]
pub struct Telemetry {
    tx: Option<mpsc::Sender<Envelope>>,
}

impl Telemetry {
    /// A handle that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// A handle plus the queue the publisher task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn publish(&self, event: TelemetryEvent, timestamp_ms: i64, data: Value) {
        let Some(tx) = &self.tx else {
            return;
        };
        let envelope = Envelope {
            event,
            timestamp_ms,
            data,
        };
        match tx.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(e)) => {
                debug!(event = e.event.as_str(), "telemetry queue full, event dropped");
            }
            Err(TrySendError::Closed(e)) => {
                debug!(event = e.event.as_str(), "telemetry publisher gone, event dropped");
            }
        }
    }
}

/// Drain `rx` into Redis `PUBLISH <channel>` until shutdown.
///
/// Events still queued at shutdown are flushed before returning, unless
/// Redis is unreachable, in which case the rest are dropped. The connection
/// is re-opened lazily after any failure.
pub async fn run_publisher(
    mut rx: mpsc::Receiver<Envelope>,
    redis_url: String,
    channel: String,
    shutdown: CancellationToken,
) {
    let client = match redis::Client::open(redis_url.as_str()) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "invalid Redis URL, telemetry disabled");
            return;
        }
    };
    let mut conn: Option<MultiplexedConnection> = None;
    info!(channel = %channel, "telemetry publisher started");

    loop {
        let envelope = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(e) => e,
                None => break,
            },
        };
        publish_one(&client, &mut conn, &channel, &envelope).await;
    }

    // Flush what the pipeline queued on its way out.
    rx.close();
    let mut flushed = 0usize;
    let mut dropped = 0usize;
    while let Some(envelope) = rx.recv().await {
        if dropped > 0 {
            dropped += 1;
            continue;
        }
        if publish_one(&client, &mut conn, &channel, &envelope).await {
            flushed += 1;
        } else {
            dropped += 1;
        }
    }
    if dropped > 0 {
        warn!(flushed, dropped, "Redis unavailable at shutdown, queued telemetry dropped");
    }
    info!(flushed, "telemetry publisher stopped");
}

/// Returns `false` when Redis could not be reached in time.
async fn publish_one(
    client: &redis::Client,
    conn: &mut Option<MultiplexedConnection>,
    channel: &str,
    envelope: &Envelope,
) -> bool {
    let io_timeout = Duration::from_millis(REDIS_IO_TIMEOUT_MS);
    let json = match serde_json::to_string(envelope) {
        Ok(j) => j,
        Err(e) => {
            debug!(error = %e, "failed to serialize telemetry event");
            return true;
        }
    };

    if conn.is_none() {
        match timeout(io_timeout, client.get_multiplexed_async_connection()).await {
            Ok(Ok(c)) => {
                debug!("telemetry connected to Redis");
                *conn = Some(c);
            }
            Ok(Err(e)) => {
                debug!(error = %e, event = envelope.event.as_str(), "Redis unavailable, event dropped");
                return false;
            }
            Err(_) => {
                debug!(event = envelope.event.as_str(), "Redis connect timed out, event dropped");
                return false;
            }
        }
    }
    let Some(c) = conn.as_mut() else {
        return false;
    };

    let result: Result<Result<i64, redis::RedisError>, _> =
        timeout(io_timeout, c.publish(channel, &json)).await;
    match result {
        Ok(Ok(receivers)) => {
            debug!(event = envelope.event.as_str(), receivers, bytes = json.len(), "telemetry published");
            true
        }
        Ok(Err(e)) => {
            debug!(error = %e, event = envelope.event.as_str(), "telemetry publish failed");
            *conn = None;
            false
        }
        Err(_) => {
            debug!(event = envelope.event.as_str(), "telemetry publish timed out");
            *conn = None;
            false
        }
    }
}
