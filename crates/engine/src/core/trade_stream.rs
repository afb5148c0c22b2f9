//! Binance WebSocket tick source.
//!
//! Subscribes to the combined `<sym>@trade` and `<sym>@bookTicker` streams
//! and forwards [`MarketEvent`]s in arrival order over a bounded channel.
//! Disconnects are retried with exponential backoff; the attempt counter
//! resets after every successful connection.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::StreamConfig;
use crate::types::{MarketEvent, Quote, Side, Tick};

/// Combined stream envelope: `{"stream": "...", "data": {...}}`.
#[derive(Debug, Deserialize)]
struct StreamWrapper {
    stream: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TradePayload {
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "q")]
    quantity: Decimal,
    #[serde(rename = "T")]
    trade_time_ms: i64,
    /// Buyer was the maker, so the aggressor sold.
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

#[derive(Debug, Deserialize)]
struct BookTickerPayload {
    #[serde(rename = "b")]
    bid: Decimal,
    #[serde(rename = "a")]
    ask: Decimal,
}

/// Decode one combined-stream text frame.
///
/// `Ok(None)` for streams this engine does not consume.
pub(crate) fn parse_market_event(text: &str, received_at_ms: i64) -> Result<Option<MarketEvent>> {
    let wrapper: StreamWrapper =
        serde_json::from_str(text).context("failed to parse websocket message")?;

    if wrapper.stream.ends_with("@trade") {
        let t: TradePayload =
            serde_json::from_value(wrapper.data).context("failed to parse trade payload")?;
        let side = if t.buyer_is_maker { Side::Sell } else { Side::Buy };
        return Ok(Some(MarketEvent::Tick(Tick::new(
            t.trade_time_ms,
            t.price,
            t.quantity,
            side,
        ))));
    }
    if wrapper.stream.ends_with("@bookTicker") {
        let b: BookTickerPayload =
            serde_json::from_value(wrapper.data).context("failed to parse bookTicker payload")?;
        return Ok(Some(MarketEvent::Quote(Quote {
            bid: b.bid,
            ask: b.ask,
            timestamp_ms: received_at_ms,
        })));
    }
    Ok(None)
}

pub struct TradeStream {
    config: StreamConfig,
    symbol: String,
    tx: mpsc::Sender<MarketEvent>,
    shutdown: CancellationToken,
}

impl TradeStream {
    pub fn new(
        config: StreamConfig,
        symbol: impl Into<String>,
        tx: mpsc::Sender<MarketEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            symbol: symbol.into(),
            tx,
            shutdown,
        }
    }

    fn build_stream_url(&self) -> String {
        let sym = self.symbol.to_lowercase();
        format!(
            "{}/stream?streams={sym}@trade/{sym}@bookTicker",
            self.config.ws_url.trim_end_matches('/')
        )
    }

    /// Run until shutdown, the consumer goes away, or reconnects are exhausted.
    pub async fn run(&self) -> Result<()> {
        let url = self.build_stream_url();
        info!(
            symbol = %self.symbol,
            url = %url,
            reconnect_delay_ms = self.config.reconnect_delay_ms,
            max_reconnect_attempts = self.config.max_reconnect_attempts,
            "trade stream starting"
        );

        let mut attempts = 0u32;
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.connect_and_process(&url, &mut attempts).await {
                Ok(()) => break,
                Err(e) => {
                    attempts += 1;
                    if attempts > self.config.max_reconnect_attempts {
                        error!(
                            error = %e,
                            attempts,
                            "max reconnect attempts exceeded, giving up"
                        );
                        return Err(e);
                    }

                    let delay_ms = self.config.reconnect_delay_ms * (1u64 << attempts.min(5));
                    warn!(
                        error = %e,
                        attempt = attempts,
                        max_attempts = self.config.max_reconnect_attempts,
                        next_retry_ms = delay_ms,
                        "trade stream disconnected, reconnecting"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                    }
                }
            }
        }

        info!(symbol = %self.symbol, "trade stream stopped");
        Ok(())
    }

    /// `Ok` on a clean stop; `Err` on any disconnect worth retrying.
    async fn connect_and_process(&self, url: &str, attempts: &mut u32) -> Result<()> {
        let started = Instant::now();
        let (ws, response) = connect_async(url)
            .await
            .context("failed to connect to binance websocket")?;
        *attempts = 0;
        info!(
            connect_time_ms = started.elapsed().as_millis() as u64,
            status = ?response.status(),
            "trade stream connected"
        );

        let (mut write, mut read) = ws.split();
        let mut forwarded = 0u64;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    debug!(forwarded, "trade stream closing on shutdown");
                    return Ok(());
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let event = match parse_market_event(&text, Utc::now().timestamp_millis()) {
                            Ok(Some(event)) => event,
                            Ok(None) => continue,
                            Err(e) => {
                                warn!(error = %e, "dropping undecodable frame");
                                continue;
                            }
                        };
                        if self.tx.send(event).await.is_err() {
                            info!("market event consumer gone, stopping stream");
                            return Ok(());
                        }
                        forwarded += 1;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        trace!("ping received, sending pong");
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            warn!(error = %e, "failed to send pong");
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Err(anyhow!(
                            "server closed the stream: {:?}",
                            frame.map(|f| f.reason.to_string())
                        ));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(anyhow!("websocket error: {e}")),
                    None => return Err(anyhow!("websocket stream ended")),
                }
            }
        }
    }
}
