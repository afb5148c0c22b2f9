//! Historical candle fetch over the Binance Spot REST API.
//!
//! Consumers depend on the [`CandleSource`] trait so the regime filter and
//! level seeding can be exercised against in-memory fixtures.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::types::{Candle, Timeframe};

const KLINES_PATH: &str = "/api/v3/klines";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Ordered (oldest first) OHLCV history for a symbol and timeframe.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>>;
}

pub struct BinanceCandleClient {
    client: reqwest::Client,
    base_url: String,
}

impl BinanceCandleClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn binance_get(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!(url = %url, "rate limited");
            return Err(EngineError::DataUnavailable { name: url }.into());
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(url = %url, status = %status, body = %body, "REST request failed");
            return Err(EngineError::DataUnavailable { name: url }.into());
        }

        resp.json::<Value>()
            .await
            .with_context(|| format!("parse JSON from {url}"))
    }
}

#[async_trait]
impl CandleSource for BinanceCandleClient {
    /// `GET /api/v3/klines` returns `[[open_time, O, H, L, C, V, close_time, …], …]`.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let start = Instant::now();
        let limit_str = limit.to_string();
        let data = self
            .binance_get(
                KLINES_PATH,
                &[
                    ("symbol", symbol),
                    ("interval", timeframe.as_binance_interval()),
                    ("limit", &limit_str),
                ],
            )
            .await?;

        let candles = parse_klines(&data, timeframe, Utc::now().timestamp_millis())
            .ok_or_else(|| EngineError::DataUnavailable {
                name: format!("klines {symbol} {timeframe}: response is not an array"),
            })?;

        debug!(
            symbol,
            timeframe = %timeframe,
            candles = candles.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "klines fetched"
        );
        Ok(candles)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Parsing helpers
// ═══════════════════════════════════════════════════════════════════════════

/// Parse a klines response. `None` when the payload is not an array.
///
/// Short rows and rows that violate the OHLC invariant are skipped. A candle
/// is `closed` once its interval ended before `now_ms`.
pub(crate) fn parse_klines(data: &Value, timeframe: Timeframe, now_ms: i64) -> Option<Vec<Candle>> {
    let rows = data.as_array()?;
    let mut out = Vec::with_capacity(rows.len());

    for row in rows {
        let Some(fields) = row.as_array().filter(|f| f.len() >= 6) else {
            continue;
        };
        let Some(open_time_ms) = fields[0].as_i64() else {
            continue;
        };
        let mut candle = Candle {
            timeframe,
            open_time_ms,
            open: parse_decimal_str(&fields[1]),
            high: parse_decimal_str(&fields[2]),
            low: parse_decimal_str(&fields[3]),
            close: parse_decimal_str(&fields[4]),
            volume: parse_decimal_str(&fields[5]),
            closed: false,
        };
        if !candle.is_consistent() || candle.low <= Decimal::ZERO {
            debug!(open_time_ms, "skipping malformed kline");
            continue;
        }
        candle.closed = candle.close_time_ms() <= now_ms;
        out.push(candle);
    }
    Some(out)
}

/// Binance sends decimals as strings; fall back to JSON numbers, else zero.
fn parse_decimal_str(v: &Value) -> Decimal {
    v.as_str()
        .and_then(|s| s.parse::<Decimal>().ok())
        .or_else(|| v.as_f64().and_then(Decimal::from_f64))
        .unwrap_or(Decimal::ZERO)
}
