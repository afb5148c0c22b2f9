//! Per-symbol tick pipeline.
//!
//! ```text
//! tick ─▶ LevelTracker ─▶ ImbalanceTracker ─▶ broker.monitor (closes → risk)
//!                                         └─▶ hunter.evaluate(regime) ─▶ risk ─▶ broker.open
//! ```
//!
//! The pipeline owns every piece of mutable trading state and runs on a
//! single task, so nothing here locks. The only shared input is the regime
//! snapshot, read through a [`RegimeHandle`].

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::constants::DEFAULT_PULSE_INTERVAL_MS;
use crate::core::hunter::{Evaluation, LiquiditySweepStrategy};
use crate::core::imbalance::ImbalanceTracker;
use crate::core::levels::LevelTracker;
use crate::core::regime::RegimeHandle;
use crate::core::risk::{RiskContext, RiskDecision, RiskManager};
use crate::core::telemetry::{Telemetry, TelemetryEvent};
use crate::core::trade_ledger::TradeLedger;
use crate::errors::EngineError;
use crate::execution::ExecutionAdapter;
use crate::types::{
    Candle, ClosedTrade, Level, MarketEvent, OrderFlowSnapshot, Position, Quote,
    RegimeSnapshot, Tick,
};

/// Everything one tick produced, for callers that replay or test.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub flow: OrderFlowSnapshot,
    pub evaluation: Evaluation,
    /// Risk decision for a forwarded signal.
    pub decision: Option<RiskDecision>,
    pub opened: Option<Position>,
    pub closed: Vec<ClosedTrade>,
}

pub struct SymbolPipeline<E: ExecutionAdapter> {
    symbol: String,
    imbalance: ImbalanceTracker,
    levels: LevelTracker,
    hunter: LiquiditySweepStrategy,
    risk: RiskManager,
    broker: E,
    regime: RegimeHandle,
    regime_freshness_ms: i64,
    telemetry: Telemetry,
    ledger: Option<TradeLedger>,
    pulse_interval_ms: i64,
    latest_quote: Option<Quote>,
    last_tick: Option<Tick>,
    last_pulse_ms: Option<i64>,
    regime_stale_warned: bool,
}

impl<E: ExecutionAdapter> SymbolPipeline<E> {
    pub fn new(
        config: &EngineConfig,
        broker: E,
        regime: RegimeHandle,
        telemetry: Telemetry,
        ledger: Option<TradeLedger>,
    ) -> Self {
        let symbol = config.app.symbol.clone();
        let pulse_interval_ms = config
            .telemetry
            .as_ref()
            .map(|t| t.pulse_interval_ms)
            .unwrap_or(DEFAULT_PULSE_INTERVAL_MS);

        Self {
            imbalance: ImbalanceTracker::new(config.strategy.imbalance.clone()),
            levels: LevelTracker::new(&config.strategy.levels),
            hunter: LiquiditySweepStrategy::new(
                symbol.clone(),
                config.strategy.hunter.clone(),
                config.regime.adx_extreme,
            ),
            risk: RiskManager::new(config.risk.clone()),
            broker,
            regime,
            regime_freshness_ms: config.regime.freshness_ms(),
            telemetry,
            ledger,
            pulse_interval_ms,
            latest_quote: None,
            last_tick: None,
            last_pulse_ms: None,
            regime_stale_warned: false,
            symbol,
        }
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn broker(&self) -> &E {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut E {
        &mut self.broker
    }

    pub fn hunter(&self) -> &LiquiditySweepStrategy {
        &self.hunter
    }

    pub fn levels(&self) -> &LevelTracker {
        &self.levels
    }

    /// Warm levels and ATR from exchange history.
    pub fn seed_levels(&mut self, h1: &[Candle], h4: &[Candle], m1: &[Candle]) {
        let updated = self.levels.seed(h1, h4, m1);
        let ts = self.last_tick.as_ref().map(|t| t.timestamp_ms).unwrap_or(0);
        for level in &updated {
            self.publish_level(level, ts);
        }
    }

    pub fn on_quote(&mut self, quote: Quote) {
        self.latest_quote = Some(quote);
    }

    /// Push one trade through the whole pipeline.
    ///
    /// Invalid and out-of-order ticks are rejected before any state changes.
    /// Only [`EngineError::is_fatal`] errors should stop the caller.
    pub fn on_tick(&mut self, tick: &Tick) -> Result<TickOutcome, EngineError> {
        tick.validate()?;
        if let Some(prev) = &self.last_tick {
            if tick.timestamp_ms < prev.timestamp_ms {
                return Err(EngineError::LateTick {
                    timestamp_ms: tick.timestamp_ms,
                    open_ms: prev.timestamp_ms,
                });
            }
        }

        // Both fallible steps run before either tracker commits.
        let pending_flow = self.imbalance.prepare(tick)?;
        let level_push = self.levels.push(tick)?;
        let flow = self.imbalance.commit(pending_flow);
        self.last_tick = Some(tick.clone());

        for level in &level_push.updated_levels {
            self.publish_level(level, tick.timestamp_ms);
        }

        // Resting stops and targets first: a close frees the symbol.
        let closed = self.broker.monitor(tick, &mut self.risk);
        for trade in &closed {
            self.persist_close(trade);
        }

        let regime = self.regime.current();
        self.check_regime_age(&regime, tick.timestamp_ms);

        let evaluation = self.hunter.evaluate(
            tick,
            &flow,
            self.levels.levels(),
            self.levels.atr(),
            &regime,
        );

        let mut decision = None;
        let mut opened = None;
        match &evaluation {
            Evaluation::Idle => {}
            Evaluation::Blocked { signal, reason } => {
                self.telemetry.publish(
                    TelemetryEvent::SignalGen,
                    tick.timestamp_ms,
                    json!({
                        "symbol": signal.symbol,
                        "side": signal.side,
                        "entry": signal.entry,
                        "sl": signal.stop_loss,
                        "tp": signal.take_profit,
                        "strength": signal.strength,
                        "reason": signal.reason,
                        "forwarded": false,
                        "blocked_by": reason.to_string(),
                    }),
                );
            }
            Evaluation::Emitted(signal) => {
                let position_open = self.broker.has_open_position(&signal.symbol);
                let blocked_by = position_open.then_some("position open");
                self.telemetry.publish(
                    TelemetryEvent::SignalGen,
                    tick.timestamp_ms,
                    json!({
                        "symbol": signal.symbol,
                        "side": signal.side,
                        "entry": signal.entry,
                        "sl": signal.stop_loss,
                        "tp": signal.take_profit,
                        "strength": signal.strength,
                        "reason": signal.reason,
                        "forwarded": blocked_by.is_none(),
                        "blocked_by": blocked_by,
                    }),
                );

                if position_open {
                    info!(symbol = %self.symbol, "signal ignored: position already open");
                } else {
                    let ctx = RiskContext {
                        balance: self.broker.balance(),
                        quote: self.latest_quote.clone(),
                        volume_z: flow.volume_z,
                        timestamp_ms: tick.timestamp_ms,
                    };
                    let d = self.risk.evaluate(signal, &ctx)?;
                    if let RiskDecision::Approved { size } = &d {
                        match self.broker.open(signal, *size, tick.timestamp_ms) {
                            Ok(position) => {
                                self.publish_open(&position, tick.timestamp_ms);
                                opened = Some(position);
                            }
                            Err(EngineError::PositionAlreadyOpen { symbol }) => {
                                info!(symbol = %symbol, "open skipped: position already open");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    decision = Some(d);
                }
            }
        }

        self.maybe_pulse(tick, &flow, &regime);

        Ok(TickOutcome {
            flow,
            evaluation,
            decision,
            opened,
            closed,
        })
    }

    /// Consume market events until shutdown or the source closes.
    ///
    /// Non-fatal errors drop the offending event. A fatal error flushes,
    /// cancels `shutdown` for the rest of the process and is returned.
    pub async fn run(
        &mut self,
        mut rx: mpsc::Receiver<MarketEvent>,
        shutdown: CancellationToken,
    ) -> Result<(), EngineError> {
        info!(symbol = %self.symbol, "pipeline started");

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                ev = rx.recv() => match ev {
                    Some(ev) => ev,
                    None => {
                        warn!(symbol = %self.symbol, "market event source closed");
                        break;
                    }
                },
            };

            match event {
                MarketEvent::Quote(q) => self.on_quote(q),
                MarketEvent::Tick(t) => match self.on_tick(&t) {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => {
                        error!(symbol = %self.symbol, error = %e, "fatal pipeline error, shutting down");
                        self.flush();
                        shutdown.cancel();
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(
                            symbol = %self.symbol,
                            error = %e,
                            timestamp_ms = t.timestamp_ms,
                            price = %t.price,
                            "tick dropped"
                        );
                    }
                },
            }
        }

        self.flush();
        Ok(())
    }

    /// Close any open position at the last traded price and report it.
    ///
    /// Safe to call more than once.
    pub fn flush(&mut self) -> Vec<ClosedTrade> {
        let closed = match &self.last_tick {
            Some(t) => {
                let (price, ts) = (t.price, t.timestamp_ms);
                self.broker.flatten(price, ts, &mut self.risk)
            }
            None => Vec::new(),
        };
        for trade in &closed {
            self.persist_close(trade);
        }
        self.log_stats();
        closed
    }

    // -----------------------------------------------------------------------
    // Side effects
    // -----------------------------------------------------------------------

    fn persist_close(&self, trade: &ClosedTrade) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.append(trade) {
                warn!(id = %trade.id, error = %e, path = %ledger.path().display(), "ledger write failed");
            }
        }
        self.telemetry.publish(
            TelemetryEvent::TradeUpdate,
            trade.closed_at_ms,
            json!({
                "status": "closed",
                "trade": trade,
                "balance": self.broker.balance(),
                "stats": self.broker.stats(),
                "daily_pnl_pct": self.risk.daily_pnl_pct_f64(),
                "consecutive_losses": self.risk.state().consecutive_losses,
            }),
        );
    }

    fn publish_open(&self, position: &Position, ts: i64) {
        self.telemetry.publish(
            TelemetryEvent::TradeUpdate,
            ts,
            json!({
                "status": "opened",
                "position": position,
                "balance": self.broker.balance(),
                "stats": self.broker.stats(),
            }),
        );
    }

    fn publish_level(&self, level: &Level, ts: i64) {
        self.telemetry.publish(
            TelemetryEvent::LevelUpdate,
            ts,
            json!({
                "symbol": self.symbol,
                "timeframe": level.timeframe,
                "kind": level.kind,
                "price": level.price,
                "formed_at_ms": level.formed_at_ms,
            }),
        );
    }

    fn maybe_pulse(&mut self, tick: &Tick, flow: &OrderFlowSnapshot, regime: &RegimeSnapshot) {
        if !self.telemetry.is_enabled() {
            return;
        }
        if self
            .last_pulse_ms
            .is_some_and(|last| tick.timestamp_ms - last < self.pulse_interval_ms)
        {
            return;
        }
        self.last_pulse_ms = Some(tick.timestamp_ms);

        self.telemetry.publish(
            TelemetryEvent::MarketPulse,
            tick.timestamp_ms,
            json!({
                "symbol": self.symbol,
                "price": tick.price,
                "nofi": flow.nofi,
                "volume_z": flow.volume_z,
                "absorption": flow.absorption,
                "efficiency_ratio": flow.efficiency_ratio,
                "hunter_state": self.hunter.state().as_str(),
                "atr": self.levels.atr(),
                "trend": regime.trend,
                "adx": regime.adx,
                "divergence": regime.divergence,
                "regime_stale": !regime.is_fresh(tick.timestamp_ms, self.regime_freshness_ms),
                "balance": self.broker.balance(),
            }),
        );
    }

    fn check_regime_age(&mut self, regime: &RegimeSnapshot, now_ms: i64) {
        let fresh = regime.is_fresh(now_ms, self.regime_freshness_ms);
        if !fresh && !self.regime_stale_warned {
            warn!(
                symbol = %self.symbol,
                age_ms = regime.age_ms(now_ms),
                freshness_ms = self.regime_freshness_ms,
                "serving stale regime snapshot"
            );
        }
        self.regime_stale_warned = !fresh;
    }

    fn log_stats(&self) {
        let state = self.risk.state();
        info!(
            symbol = %self.symbol,
            balance = %self.broker.balance().round_dp(2),
            daily_pnl_pct = %state.daily_pnl_pct.round_dp(3),
            consecutive_losses = state.consecutive_losses,
            halted_for_day = state.halted_for_day,
            stats = ?self.broker.stats(),
            "pipeline flushed"
        );
    }
}
