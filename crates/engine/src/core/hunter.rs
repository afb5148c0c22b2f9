//! Liquidity sweep hunter.
//!
//! ```text
//!  SCANNING ──cross level──▶ SWEEPING ──back inside──▶ CONFIRMING ──nOFI──▶ signal
//!      ▲                        │                          │
//!      └──── timeout / breakout ┘──── expiry / new wick ───┘
//! ```
//!
//! One episode at a time: crossings of other levels are ignored until the
//! machine is back in SCANNING, and a level that produced an episode is not
//! hunted again until the level tracker replaces it. Timeouts use tick
//! (event) time so replays behave like live runs.

use std::collections::HashSet;

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::HunterConfig;
use crate::core::regime::{self, GateBlock};
use crate::types::{Level, LevelKey, LevelKind, OrderFlowSnapshot, RegimeSnapshot, Side, Signal, Tick};

/// A sweep in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepEpisode {
    pub level: Level,
    /// Direction of the reversal trade.
    pub side: Side,
    /// Furthest print beyond the level.
    pub wick: Decimal,
    pub started_at_ms: i64,
    /// Time price came back inside; set on entering CONFIRMING.
    pub returned_at_ms: Option<i64>,
}

impl SweepEpisode {
    /// Price is still beyond the swept level.
    fn is_beyond_level(&self, price: Decimal) -> bool {
        self.level.is_breached_by(price)
    }

    /// Price printed past the recorded wick.
    fn is_beyond_wick(&self, price: Decimal) -> bool {
        match self.level.kind {
            LevelKind::Low => price < self.wick,
            LevelKind::High => price > self.wick,
        }
    }

    fn penetration(&self) -> Decimal {
        (self.wick - self.level.price).abs()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HunterState {
    Scanning,
    Sweeping(SweepEpisode),
    Confirming(SweepEpisode),
}

impl HunterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scanning => "SCANNING",
            Self::Sweeping(_) => "SWEEPING",
            Self::Confirming(_) => "CONFIRMING",
        }
    }

    pub fn episode(&self) -> Option<&SweepEpisode> {
        match self {
            Self::Scanning => None,
            Self::Sweeping(ep) | Self::Confirming(ep) => Some(ep),
        }
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Idle,
    /// Confirmed and passed the regime gate.
    Emitted(Signal),
    /// Confirmed but refused by the regime gate; not forwarded.
    Blocked { signal: Signal, reason: GateBlock },
}

pub struct LiquiditySweepStrategy {
    symbol: String,
    config: HunterConfig,
    adx_extreme: Decimal,
    state: HunterState,
    /// Levels that already produced an episode, pruned as the tracker replaces them.
    hunted: HashSet<LevelKey>,
}

impl LiquiditySweepStrategy {
    pub fn new(symbol: impl Into<String>, config: HunterConfig, adx_extreme: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            config,
            adx_extreme,
            state: HunterState::Scanning,
            hunted: HashSet::new(),
        }
    }

    pub fn state(&self) -> &HunterState {
        &self.state
    }

    /// Advance the machine by one tick.
    pub fn evaluate<'a>(
        &mut self,
        tick: &Tick,
        flow: &OrderFlowSnapshot,
        levels: impl IntoIterator<Item = &'a Level>,
        atr: Decimal,
        regime: &RegimeSnapshot,
    ) -> Evaluation {
        let state = std::mem::replace(&mut self.state, HunterState::Scanning);
        let (next, signal) = match state {
            HunterState::Scanning => (self.scan(tick, levels), None),
            HunterState::Sweeping(ep) => self.sweep(ep, tick, flow, atr),
            HunterState::Confirming(ep) => self.confirm(ep, tick, flow),
        };
        self.state = next;

        let Some(signal) = signal else {
            return Evaluation::Idle;
        };
        match regime::gate(regime, signal.side, self.adx_extreme) {
            Ok(()) => {
                info!(
                    symbol = %self.symbol,
                    side = %signal.side,
                    entry = %signal.entry,
                    stop_loss = %signal.stop_loss,
                    take_profit = %signal.take_profit,
                    strength = signal.strength,
                    reason = %signal.reason,
                    "signal emitted"
                );
                Evaluation::Emitted(signal)
            }
            Err(reason) => {
                info!(
                    symbol = %self.symbol,
                    side = %signal.side,
                    trend = regime.trend.as_str(),
                    adx = %regime.adx.round_dp(2),
                    divergence = regime.divergence,
                    reason = %reason,
                    "signal blocked by regime gate"
                );
                Evaluation::Blocked { signal, reason }
            }
        }
    }

    // -----------------------------------------------------------------------
    // SCANNING
    // -----------------------------------------------------------------------

    fn scan<'a>(&mut self, tick: &Tick, levels: impl IntoIterator<Item = &'a Level>) -> HunterState {
        let tol = self.config.sweep_tolerance;
        let price = tick.price;

        let levels: Vec<&Level> = levels.into_iter().collect();
        self.hunted.retain(|key| levels.iter().any(|l| l.key() == *key));

        // Nearest crossed level wins.
        let crossed = levels
            .into_iter()
            .filter(|l| !self.hunted.contains(&l.key()))
            .filter(|l| match l.kind {
                LevelKind::Low => price < l.price * (Decimal::ONE - tol),
                LevelKind::High => price > l.price * (Decimal::ONE + tol),
            })
            .min_by_key(|l| (price - l.price).abs());

        let Some(level) = crossed else {
            return HunterState::Scanning;
        };

        self.hunted.insert(level.key());
        let ep = SweepEpisode {
            level: level.clone(),
            side: level.kind.reversal_side(),
            wick: price,
            started_at_ms: tick.timestamp_ms,
            returned_at_ms: None,
        };
        info!(
            symbol = %self.symbol,
            from = "SCANNING",
            to = "SWEEPING",
            timeframe = %level.timeframe,
            kind = level.kind.as_str(),
            level = %level.price,
            price = %price,
            "sweep started"
        );
        HunterState::Sweeping(ep)
    }

    // -----------------------------------------------------------------------
    // SWEEPING
    // -----------------------------------------------------------------------

    fn sweep(
        &self,
        mut ep: SweepEpisode,
        tick: &Tick,
        flow: &OrderFlowSnapshot,
        atr: Decimal,
    ) -> (HunterState, Option<Signal>) {
        let price = tick.price;

        if tick.timestamp_ms - ep.started_at_ms > self.config.max_sweep_duration_ms {
            self.reset(&ep, "sweep timed out without reclaim");
            return (HunterState::Scanning, None);
        }

        if ep.is_beyond_level(price) {
            if ep.is_beyond_wick(price) {
                ep.wick = price;
            }
            let limit = self.config.max_sweep_atr_mult * atr;
            if atr > Decimal::ZERO && ep.penetration() > limit {
                self.reset(&ep, "penetration beyond ATR limit, treating as breakout");
                return (HunterState::Scanning, None);
            }
            return (HunterState::Sweeping(ep), None);
        }

        ep.returned_at_ms = Some(tick.timestamp_ms);
        info!(
            symbol = %self.symbol,
            from = "SWEEPING",
            to = "CONFIRMING",
            level = %ep.level.price,
            wick = %ep.wick,
            price = %price,
            "price back inside level"
        );
        // Confirmation may land on the reclaim tick itself.
        self.confirm(ep, tick, flow)
    }

    // -----------------------------------------------------------------------
    // CONFIRMING
    // -----------------------------------------------------------------------

    fn confirm(
        &self,
        ep: SweepEpisode,
        tick: &Tick,
        flow: &OrderFlowSnapshot,
    ) -> (HunterState, Option<Signal>) {
        let price = tick.price;

        if ep.is_beyond_wick(price) {
            self.reset(&ep, "new extreme beyond wick, sweep invalidated");
            return (HunterState::Scanning, None);
        }

        let returned_at = ep.returned_at_ms.unwrap_or(tick.timestamp_ms);
        if tick.timestamp_ms - returned_at > self.config.confirmation_window_ms {
            self.reset(&ep, "confirmation window expired");
            return (HunterState::Scanning, None);
        }

        let threshold = self.config.nofi_threshold;
        let confirmed = match ep.side {
            Side::Buy => flow.nofi >= threshold,
            Side::Sell => flow.nofi <= -threshold,
        };
        if !confirmed {
            debug!(
                symbol = %self.symbol,
                nofi = flow.nofi,
                threshold,
                "awaiting order-flow confirmation"
            );
            return (HunterState::Confirming(ep), None);
        }

        let level = ep.level.price;
        let signal = Signal {
            symbol: self.symbol.clone(),
            side: ep.side,
            entry: price,
            stop_loss: ep.wick,
            take_profit: level + self.config.tp_retracement * (level - ep.wick),
            strength: flow.nofi.abs().min(1.0),
            reason: format!(
                "{} {} sweep at {} (wick {}), nOFI {:.2}",
                ep.level.timeframe,
                ep.level.kind.as_str(),
                level,
                ep.wick,
                flow.nofi
            ),
            level: ep.level.clone(),
            created_at_ms: tick.timestamp_ms,
        };

        info!(
            symbol = %self.symbol,
            from = "CONFIRMING",
            to = "SCANNING",
            nofi = flow.nofi,
            "sweep confirmed"
        );

        if !signal.is_well_ordered() {
            info!(
                symbol = %self.symbol,
                entry = %signal.entry,
                stop_loss = %signal.stop_loss,
                take_profit = %signal.take_profit,
                "confirmed sweep discarded: entry outside stop/target"
            );
            return (HunterState::Scanning, None);
        }
        (HunterState::Scanning, Some(signal))
    }

    fn reset(&self, ep: &SweepEpisode, why: &str) {
        info!(
            symbol = %self.symbol,
            to = "SCANNING",
            level = %ep.level.price,
            wick = %ep.wick,
            reason = why,
            "sweep episode ended"
        );
    }
}
