//! Risk gatekeeper: circuit breakers, spread guard and position sizing.
//!
//! Checks run in a fixed order and the first failure rejects. A rejection
//! is a normal decision, not an error; the only error is an account state
//! that makes sizing meaningless (non-positive balance).
//!
//! The daily boundary is the UTC date of the event timestamp. Crossing it
//! clears daily PnL, the consecutive-loss count and the daily-loss latch.

use std::fmt;

use chrono::{DateTime, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::errors::EngineError;
use crate::types::{ClosedTrade, Quote, Signal};

/// Inputs to a risk decision that live outside the signal.
#[derive(Debug, Clone)]
pub struct RiskContext {
    pub balance: Decimal,
    pub quote: Option<Quote>,
    /// Volume z-score of the current tick.
    pub volume_z: f64,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    Paused(String),
    DailyLossLimit { daily_pnl_pct: Decimal },
    ConsecutiveLosses { count: u32 },
    VolatilityBreaker { volume_z: f64 },
    MissingQuote,
    InvalidQuote,
    SpreadTooWide { spread_pct: Decimal },
    DegenerateStop,
    NonPositiveSize,
}

impl RejectReason {
    /// Short machine-readable tag for telemetry.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Paused(_) => "paused",
            Self::DailyLossLimit { .. } => "daily-loss",
            Self::ConsecutiveLosses { .. } => "consecutive-loss",
            Self::VolatilityBreaker { .. } => "volatility",
            Self::MissingQuote => "missing-quote",
            Self::InvalidQuote => "invalid-quote",
            Self::SpreadTooWide { .. } => "spread",
            Self::DegenerateStop => "degenerate-stop",
            Self::NonPositiveSize => "non-positive-size",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paused(reason) => write!(f, "trading paused: {reason}"),
            Self::DailyLossLimit { daily_pnl_pct } => {
                write!(f, "daily-loss breaker: {}% today", daily_pnl_pct.round_dp(3))
            }
            Self::ConsecutiveLosses { count } => {
                write!(f, "consecutive-loss breaker: {count} losses in a row")
            }
            Self::VolatilityBreaker { volume_z } => {
                write!(f, "volatility breaker: volume z-score {volume_z:.2}")
            }
            Self::MissingQuote => f.write_str("spread guard: no quote available"),
            Self::InvalidQuote => f.write_str("spread guard: crossed or empty quote"),
            Self::SpreadTooWide { spread_pct } => {
                write!(f, "spread guard: spread {}% too wide", spread_pct.round_dp(4))
            }
            Self::DegenerateStop => f.write_str("sizing: zero stop distance"),
            Self::NonPositiveSize => f.write_str("sizing: non-positive size"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Approved { size: Decimal },
    Rejected { reason: RejectReason },
}

/// Account-level bookkeeping that survives across trades.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskState {
    pub daily_pnl_pct: Decimal,
    pub consecutive_losses: u32,
    /// UTC date the daily counters belong to.
    pub day: Option<NaiveDate>,
    /// Daily-loss latch; held until the next UTC day.
    pub halted_for_day: bool,
    pub paused: Option<String>,
}

pub struct RiskManager {
    config: RiskConfig,
    state: RiskState,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            state: RiskState::default(),
        }
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    /// Manual kill switch.
    pub fn pause(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "risk manager paused");
        self.state.paused = Some(reason);
    }

    pub fn resume(&mut self) {
        if self.state.paused.take().is_some() {
            info!("risk manager resumed");
        }
    }

    /// Approve with a size or reject with a reason.
    ///
    /// 1. Manual pause
    /// 2. Circuit breakers: daily loss, consecutive losses, volume z-score
    /// 3. Spread guard (fails closed without a valid quote)
    /// 4. Sizing: `balance × risk% / |entry − stop|`
    pub fn evaluate(
        &mut self,
        signal: &Signal,
        ctx: &RiskContext,
    ) -> Result<RiskDecision, EngineError> {
        if ctx.balance <= Decimal::ZERO {
            return Err(EngineError::FatalAccountState {
                reason: format!("balance {} is not positive", ctx.balance),
            });
        }
        self.roll_day(ctx.timestamp_ms);

        let decision = match self.check(signal, ctx) {
            Ok(size) => RiskDecision::Approved { size },
            Err(reason) => {
                info!(
                    symbol = %signal.symbol,
                    side = %signal.side,
                    code = reason.code(),
                    reason = %reason,
                    "signal rejected by risk"
                );
                RiskDecision::Rejected { reason }
            }
        };
        Ok(decision)
    }

    fn check(&mut self, signal: &Signal, ctx: &RiskContext) -> Result<Decimal, RejectReason> {
        // 1. Manual pause
        if let Some(reason) = &self.state.paused {
            return Err(RejectReason::Paused(reason.clone()));
        }

        // 2. Circuit breakers
        if self.state.halted_for_day || self.state.daily_pnl_pct <= -self.config.max_daily_loss_pct {
            self.state.halted_for_day = true;
            return Err(RejectReason::DailyLossLimit {
                daily_pnl_pct: self.state.daily_pnl_pct,
            });
        }
        if self.state.consecutive_losses >= self.config.max_consecutive_losses {
            return Err(RejectReason::ConsecutiveLosses {
                count: self.state.consecutive_losses,
            });
        }
        if !ctx.volume_z.is_finite() || ctx.volume_z > self.config.max_volume_z {
            return Err(RejectReason::VolatilityBreaker {
                volume_z: ctx.volume_z,
            });
        }

        // 3. Spread guard
        let quote = ctx.quote.as_ref().ok_or(RejectReason::MissingQuote)?;
        let spread_pct = quote.spread_pct().ok_or(RejectReason::InvalidQuote)?;
        if spread_pct > self.config.max_spread_pct {
            return Err(RejectReason::SpreadTooWide { spread_pct });
        }

        // 4. Sizing
        let distance = signal.stop_distance();
        if distance.is_zero() {
            return Err(RejectReason::DegenerateStop);
        }
        let risk_amount = ctx.balance * self.config.risk_per_trade_pct / dec!(100);
        let size = risk_amount
            .checked_div(distance)
            .ok_or(RejectReason::NonPositiveSize)?;
        if size <= Decimal::ZERO {
            return Err(RejectReason::NonPositiveSize);
        }
        Ok(size)
    }

    /// Fold one closed trade into the daily and streak counters.
    ///
    /// Must be called exactly once per closed position; `balance_before` is
    /// the account balance before this trade's PnL was applied.
    pub fn record_outcome(&mut self, trade: &ClosedTrade, balance_before: Decimal) {
        self.roll_day(trade.closed_at_ms);

        let pnl_pct = if balance_before > Decimal::ZERO {
            trade.pnl / balance_before * dec!(100)
        } else {
            Decimal::ZERO
        };
        self.state.daily_pnl_pct += pnl_pct;

        if trade.pnl > Decimal::ZERO {
            self.state.consecutive_losses = 0;
        } else {
            self.state.consecutive_losses += 1;
        }

        info!(
            id = %trade.id,
            pnl = %trade.pnl.round_dp(4),
            pnl_pct = %pnl_pct.round_dp(4),
            daily_pnl_pct = %self.state.daily_pnl_pct.round_dp(4),
            consecutive_losses = self.state.consecutive_losses,
            "trade outcome recorded"
        );

        if !self.state.halted_for_day
            && self.state.daily_pnl_pct <= -self.config.max_daily_loss_pct
        {
            self.state.halted_for_day = true;
            warn!(
                daily_pnl_pct = %self.state.daily_pnl_pct.round_dp(4),
                limit_pct = %self.config.max_daily_loss_pct,
                "daily loss limit hit, trading halted until next UTC day"
            );
        }
        if self.state.consecutive_losses == self.config.max_consecutive_losses {
            warn!(
                consecutive_losses = self.state.consecutive_losses,
                "consecutive-loss breaker tripped"
            );
        }
    }

    fn roll_day(&mut self, timestamp_ms: i64) {
        let Some(today) = DateTime::from_timestamp_millis(timestamp_ms).map(|d| d.date_naive())
        else {
            return;
        };
        match self.state.day {
            Some(day) if day >= today => {}
            Some(day) => {
                info!(
                    from = %day,
                    to = %today,
                    daily_pnl_pct = %self.state.daily_pnl_pct.round_dp(4),
                    "daily risk counters reset"
                );
                self.state.daily_pnl_pct = Decimal::ZERO;
                self.state.consecutive_losses = 0;
                self.state.halted_for_day = false;
                self.state.day = Some(today);
            }
            None => self.state.day = Some(today),
        }
    }

    /// Daily PnL as a float for telemetry.
    pub fn daily_pnl_pct_f64(&self) -> f64 {
        self.state.daily_pnl_pct.to_f64().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExitReason, Level, LevelKind, Side, Timeframe, TradeResult};

    const DAY_MS: i64 = 86_400_000;
    const T0: i64 = 1_700_000_000_000;

    fn signal(entry: Decimal, sl: Decimal) -> Signal {
        Signal {
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            entry,
            stop_loss: sl,
            take_profit: entry + dec!(5),
            strength: 0.7,
            reason: "test".into(),
            level: Level {
                price: entry,
                timeframe: Timeframe::H1,
                kind: LevelKind::Low,
                formed_at_ms: 0,
                touched: true,
            },
            created_at_ms: T0,
        }
    }

    fn ctx(balance: Decimal) -> RiskContext {
        RiskContext {
            balance,
            quote: Some(Quote {
                bid: dec!(99.99),
                ask: dec!(100.01),
                timestamp_ms: T0,
            }),
            volume_z: 1.0,
            timestamp_ms: T0,
        }
    }

    fn closed(pnl: Decimal, at: i64) -> ClosedTrade {
        ClosedTrade {
            id: "abcd1234".into(),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            entry: dec!(100),
            stop_loss: dec!(99),
            take_profit: dec!(101),
            size: dec!(1),
            exit_price: dec!(99),
            pnl,
            result: TradeResult::from_pnl(pnl),
            exit_reason: ExitReason::StopLoss,
            opened_at_ms: at - 1,
            closed_at_ms: at,
        }
    }

    fn rejected(d: RiskDecision) -> RejectReason {
        match d {
            RiskDecision::Rejected { reason } => reason,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_sizing() {
        let mut rm = RiskManager::new(RiskConfig::default());
        let d = rm.evaluate(&signal(dec!(100), dec!(98)), &ctx(dec!(10000))).unwrap();
        // 10000 × 1% / 2
        assert_eq!(d, RiskDecision::Approved { size: dec!(50) });
    }

    #[test]
    fn test_zero_stop_distance_never_sized() {
        let mut rm = RiskManager::new(RiskConfig::default());
        let d = rm.evaluate(&signal(dec!(100), dec!(100)), &ctx(dec!(10000))).unwrap();
        assert_eq!(rejected(d), RejectReason::DegenerateStop);
    }

    #[test]
    fn test_non_positive_balance_is_fatal() {
        let mut rm = RiskManager::new(RiskConfig::default());
        let err = rm
            .evaluate(&signal(dec!(100), dec!(99)), &ctx(Decimal::ZERO))
            .expect_err("balance 0");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("balance"));
    }

    #[test]
    fn test_volatility_breaker() {
        let mut rm = RiskManager::new(RiskConfig::default());
        let mut c = ctx(dec!(10000));
        c.volume_z = 4.5;
        let reason = rejected(rm.evaluate(&signal(dec!(100), dec!(99)), &c).unwrap());
        assert_eq!(reason.code(), "volatility");

        c.volume_z = f64::NAN;
        let reason = rejected(rm.evaluate(&signal(dec!(100), dec!(99)), &c).unwrap());
        assert_eq!(reason.code(), "volatility");
    }

    #[test]
    fn test_spread_guard_fails_closed() {
        let mut rm = RiskManager::new(RiskConfig::default());
        let mut c = ctx(dec!(10000));
        c.quote = None;
        assert_eq!(
            rejected(rm.evaluate(&signal(dec!(100), dec!(99)), &c).unwrap()),
            RejectReason::MissingQuote
        );

        c.quote = Some(Quote {
            bid: dec!(100),
            ask: dec!(100.2),
            timestamp_ms: T0,
        });
        let reason = rejected(rm.evaluate(&signal(dec!(100), dec!(99)), &c).unwrap());
        assert!(reason.to_string().contains("spread"));

        c.quote = Some(Quote {
            bid: dec!(101),
            ask: dec!(100),
            timestamp_ms: T0,
        });
        assert_eq!(
            rejected(rm.evaluate(&signal(dec!(100), dec!(99)), &c).unwrap()),
            RejectReason::InvalidQuote
        );
    }

    #[test]
    fn test_consecutive_losses_breaker_and_win_reset() {
        let mut rm = RiskManager::new(RiskConfig::default());
        for i in 0..3 {
            rm.record_outcome(&closed(dec!(-1), T0 + i), dec!(10000));
        }
        let reason = rejected(rm.evaluate(&signal(dec!(100), dec!(99)), &ctx(dec!(9997))).unwrap());
        assert!(reason.to_string().contains("consecutive-loss"));

        // Reset on a winning close.
        let mut rm = RiskManager::new(RiskConfig::default());
        rm.record_outcome(&closed(dec!(-1), T0), dec!(10000));
        rm.record_outcome(&closed(dec!(-1), T0 + 1), dec!(9999));
        rm.record_outcome(&closed(dec!(2), T0 + 2), dec!(9998));
        assert_eq!(rm.state().consecutive_losses, 0);
    }

    #[test]
    fn test_daily_loss_latch_holds_until_next_day() {
        let mut rm = RiskManager::new(RiskConfig::default());
        rm.record_outcome(&closed(dec!(-310), T0), dec!(10000));
        assert!(rm.state().halted_for_day);

        // A later win does not unlatch the day.
        rm.record_outcome(&closed(dec!(500), T0 + 1_000), dec!(9690));
        for _ in 0..3 {
            let reason =
                rejected(rm.evaluate(&signal(dec!(100), dec!(99)), &ctx(dec!(10190))).unwrap());
            assert_eq!(reason.code(), "daily-loss");
        }

        let mut next_day = ctx(dec!(10190));
        next_day.timestamp_ms = T0 + DAY_MS;
        let d = rm.evaluate(&signal(dec!(100), dec!(99)), &next_day).unwrap();
        assert!(matches!(d, RiskDecision::Approved { .. }));
        assert_eq!(rm.state().daily_pnl_pct, Decimal::ZERO);
    }

    #[test]
    fn test_pause_and_resume() {
        let mut rm = RiskManager::new(RiskConfig::default());
        rm.pause("manual");
        let reason = rejected(rm.evaluate(&signal(dec!(100), dec!(99)), &ctx(dec!(10000))).unwrap());
        assert_eq!(reason, RejectReason::Paused("manual".into()));
        rm.resume();
        let d = rm.evaluate(&signal(dec!(100), dec!(99)), &ctx(dec!(10000))).unwrap();
        assert!(matches!(d, RiskDecision::Approved { .. }));
    }
}
