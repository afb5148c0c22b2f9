//! Macro trend filter refreshed off the hot path.
//!
//! The refresh task is the single writer of an `ArcSwap<RegimeSnapshot>`;
//! the tick loop reads it through a [`RegimeHandle`] without locking and
//! always sees a whole snapshot. A failed refresh leaves the previous
//! snapshot in place.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RegimeConfig;
use crate::core::data_service::CandleSource;
use crate::core::indicators;
use crate::errors::EngineError;
use crate::types::{Candle, RegimeSnapshot, Side, Timeframe, Trend};

// ═══════════════════════════════════════════════════════════════════════════
// Pure computation
// ═══════════════════════════════════════════════════════════════════════════

/// Classify the regime from H1 and M15 history (oldest first).
///
/// - trend: last H1 close vs EMA(`ema_trend_period`) of H1 closes
/// - divergence: last M15 close vs EMA(`ema_short_period`) disagrees with trend
/// - adx: Wilder ADX(`adx_period`) on H1
pub fn compute_snapshot(
    h1: &[Candle],
    m15: &[Candle],
    config: &RegimeConfig,
    fetched_at_ms: i64,
) -> Result<RegimeSnapshot, EngineError> {
    let h1_closes: Vec<Decimal> = h1.iter().map(|c| c.close).collect();
    let m15_closes: Vec<Decimal> = m15.iter().map(|c| c.close).collect();

    let ema_trend = indicators::ema_last(&h1_closes, config.ema_trend_period).ok_or_else(|| {
        EngineError::InsufficientData {
            what: format!("EMA{} on H1", config.ema_trend_period),
            needed: config.ema_trend_period,
            got: h1.len(),
        }
    })?;
    let ema_short =
        indicators::ema_last(&m15_closes, config.ema_short_period).ok_or_else(|| {
            EngineError::InsufficientData {
                what: format!("EMA{} on M15", config.ema_short_period),
                needed: config.ema_short_period,
                got: m15.len(),
            }
        })?;
    let adx = indicators::adx(h1, config.adx_period).ok_or_else(|| {
        EngineError::InsufficientData {
            what: format!("ADX{} on H1", config.adx_period),
            needed: 2 * config.adx_period + 1,
            got: h1.len(),
        }
    })?;

    // Both closes exist: the EMAs above needed at least one candle.
    let last_close_h1 = h1_closes.last().copied().unwrap_or(ema_trend);
    let last_close_m15 = m15_closes.last().copied().unwrap_or(ema_short);

    let trend = classify(last_close_h1, ema_trend);
    let short_trend = classify(last_close_m15, ema_short);

    Ok(RegimeSnapshot {
        trend,
        adx,
        divergence: short_trend != trend,
        ema200_h1: ema_trend,
        last_close_h1,
        fetched_at_ms,
    })
}

fn classify(close: Decimal, ema: Decimal) -> Trend {
    if close >= ema {
        Trend::Bullish
    } else {
        Trend::Bearish
    }
}

/// Why the regime gate refused a signal.
#[derive(Debug, Clone, PartialEq)]
pub enum GateBlock {
    /// Counter-trend while ADX reads an extreme trend.
    ExtremeTrend { trend: Trend, adx: Decimal },
    /// Counter-trend without 15-minute divergence.
    NoDivergence { trend: Trend },
}

impl fmt::Display for GateBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExtremeTrend { trend, adx } => write!(
                f,
                "counter-trend against {} with extreme ADX {}",
                trend.as_str(),
                adx.round_dp(2)
            ),
            Self::NoDivergence { trend } => write!(
                f,
                "counter-trend against {} without 15m divergence",
                trend.as_str()
            ),
        }
    }
}

/// Regime gate.
///
/// | 1H trend | ADX extreme | Buy | Sell |
/// |---|---|---|---|
/// | Bullish | no | yes | only with divergence |
/// | Bearish | no | only with divergence | yes |
/// | either | yes | counter-trend blocked | counter-trend blocked |
pub fn gate(snapshot: &RegimeSnapshot, side: Side, adx_extreme: Decimal) -> Result<(), GateBlock> {
    if side == snapshot.trend.aligned_side() {
        return Ok(());
    }
    if snapshot.adx > adx_extreme {
        return Err(GateBlock::ExtremeTrend {
            trend: snapshot.trend,
            adx: snapshot.adx,
        });
    }
    if !snapshot.divergence {
        return Err(GateBlock::NoDivergence {
            trend: snapshot.trend,
        });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Snapshot exchange
// ═══════════════════════════════════════════════════════════════════════════

/// Read side of the regime snapshot, cheap to clone.
#[derive(Clone)]
pub struct RegimeHandle {
    inner: Arc<ArcSwap<RegimeSnapshot>>,
}

impl RegimeHandle {
    /// A handle over a snapshot nobody refreshes (replay and tests).
    pub fn fixed(snapshot: RegimeSnapshot) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(snapshot)),
        }
    }

    pub fn current(&self) -> Arc<RegimeSnapshot> {
        self.inner.load_full()
    }

    /// Replace the snapshot as a whole.
    pub fn publish(&self, snapshot: RegimeSnapshot) {
        self.inner.store(Arc::new(snapshot));
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MarketRegime
// ═══════════════════════════════════════════════════════════════════════════

pub struct MarketRegime {
    source: Arc<dyn CandleSource>,
    symbol: String,
    config: RegimeConfig,
    handle: RegimeHandle,
}

impl MarketRegime {
    /// Fetch and compute the first snapshot.
    ///
    /// There is nothing stale to fall back on yet, so failure here is fatal
    /// to startup.
    pub async fn load(
        source: Arc<dyn CandleSource>,
        symbol: impl Into<String>,
        config: RegimeConfig,
    ) -> Result<Self> {
        let symbol = symbol.into();
        let snapshot = fetch_snapshot(source.as_ref(), &symbol, &config)
            .await
            .with_context(|| format!("initial regime load for {symbol}"))?;
        log_snapshot(&symbol, &snapshot, "regime loaded");

        Ok(Self {
            source,
            symbol,
            config,
            handle: RegimeHandle::fixed(snapshot),
        })
    }

    /// Recompute and publish. On failure the previous snapshot stays.
    pub async fn refresh(&self) -> Result<Arc<RegimeSnapshot>> {
        match fetch_snapshot(self.source.as_ref(), &self.symbol, &self.config).await {
            Ok(snapshot) => {
                log_snapshot(&self.symbol, &snapshot, "regime refreshed");
                self.handle.publish(snapshot);
                Ok(self.handle.current())
            }
            Err(e) => {
                let stale = self.handle.current();
                warn!(
                    symbol = %self.symbol,
                    error = %e,
                    snapshot_age_ms = Utc::now().timestamp_millis() - stale.fetched_at_ms,
                    "regime refresh failed, keeping previous snapshot"
                );
                Err(e)
            }
        }
    }

    pub fn handle(&self) -> RegimeHandle {
        self.handle.clone()
    }

    /// Periodic refresh on its own task until `shutdown` fires.
    pub fn spawn_refresh(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.refresh_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                symbol = %self.symbol,
                interval_secs = period.as_secs(),
                "regime refresh task started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!(symbol = %self.symbol, "regime refresh task stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        // Failure is already logged; the stale snapshot stays.
                        let _ = self.refresh().await;
                    }
                }
            }
        })
    }
}

async fn fetch_snapshot(
    source: &dyn CandleSource,
    symbol: &str,
    config: &RegimeConfig,
) -> Result<RegimeSnapshot> {
    let (h1, m15) = tokio::try_join!(
        source.fetch_candles(symbol, Timeframe::H1, config.h1_candles),
        source.fetch_candles(symbol, Timeframe::M15, config.m15_candles),
    )?;
    let snapshot = compute_snapshot(&h1, &m15, config, Utc::now().timestamp_millis())?;
    Ok(snapshot)
}

fn log_snapshot(symbol: &str, s: &RegimeSnapshot, msg: &str) {
    info!(
        symbol,
        trend = s.trend.as_str(),
        adx = %s.adx.round_dp(2),
        divergence = s.divergence,
        ema200_h1 = %s.ema200_h1.round_dp(2),
        last_close_h1 = %s.last_close_h1,
        "{msg}"
    );
}
