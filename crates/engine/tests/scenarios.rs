//! End-to-end runs of the per-symbol pipeline on synthetic tick tapes.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sweep_engine::config::{
    AppConfig, EngineConfig, LoggingConfig, PaperConfig, RegimeConfig, RiskConfig, StrategyConfig,
    StreamConfig,
};
use sweep_engine::core::hunter::{Evaluation, HunterState};
use sweep_engine::core::paper_broker::PaperBroker;
use sweep_engine::core::pipeline::{SymbolPipeline, TickOutcome};
use sweep_engine::core::regime::{GateBlock, RegimeHandle};
use sweep_engine::core::risk::{RejectReason, RiskDecision};
use sweep_engine::core::telemetry::Telemetry;
use sweep_engine::core::trade_ledger::TradeLedger;
use sweep_engine::errors::EngineError;
use sweep_engine::execution::ExecutionAdapter;
use sweep_engine::types::{
    Candle, ExitReason, Level, LevelKind, MarketEvent, Quote, RegimeSnapshot, Side, Signal, Tick,
    Timeframe, Trend,
};

const HOUR_MS: i64 = 3_600_000;
/// Start of an hour bucket; live ticks begin one second later.
const H_START: i64 = 1_700_002_800_000;
const T0: i64 = H_START + 1_000;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn config() -> EngineConfig {
    EngineConfig {
        app: AppConfig {
            symbol: "BTCUSDT".into(),
            logging: LoggingConfig {
                log_dir: "logs".into(),
            },
        },
        stream: StreamConfig {
            ws_url: "wss://stream.binance.com:9443".into(),
            rest_url: "https://api.binance.com".into(),
            reconnect_delay_ms: 1000,
            max_reconnect_attempts: 5,
            channel_capacity: 1024,
            seed_levels: true,
        },
        strategy: StrategyConfig::default(),
        regime: RegimeConfig::default(),
        risk: RiskConfig::default(),
        paper: PaperConfig::default(),
        telemetry: None,
    }
}

fn regime(trend: Trend, divergence: bool) -> RegimeSnapshot {
    RegimeSnapshot {
        trend,
        adx: dec!(25),
        divergence,
        ema200_h1: dec!(100),
        last_close_h1: dec!(100.5),
        fetched_at_ms: T0 - 60_000,
    }
}

fn seeded(snapshot: RegimeSnapshot, ledger: Option<TradeLedger>) -> SymbolPipeline<PaperBroker> {
    seeded_with_atr(snapshot, ledger, dec!(0.15))
}

/// 24 sealed H1 candles whose lowest low is 100 and highest high 110, plus
/// flat M1 history whose every range is `atr`, so the seeded ATR is exactly
/// `atr`.
fn seeded_with_atr(
    snapshot: RegimeSnapshot,
    ledger: Option<TradeLedger>,
    atr: Decimal,
) -> SymbolPipeline<PaperBroker> {
    let cfg = config();
    let broker = PaperBroker::new(&cfg.paper);
    let mut p = SymbolPipeline::new(
        &cfg,
        broker,
        RegimeHandle::fixed(snapshot),
        Telemetry::disabled(),
        ledger,
    );

    let h1: Vec<Candle> = (1..=24)
        .rev()
        .map(|k| {
            let low = if k == 5 { dec!(100) } else { dec!(101) };
            candle(Timeframe::H1, H_START - k * HOUR_MS, dec!(105), dec!(110), low)
        })
        .collect();
    let m1: Vec<Candle> = (1..=16)
        .rev()
        .map(|k| {
            let half = atr / dec!(2);
            candle(Timeframe::M1, H_START - k * 60_000, dec!(100.5), dec!(100.5) + half, dec!(100.5) - half)
        })
        .collect();
    p.seed_levels(&h1, &[], &m1);
    assert_eq!(p.levels().atr(), atr);
    p.on_quote(Quote {
        bid: dec!(100.04),
        ask: dec!(100.06),
        timestamp_ms: T0,
    });
    p
}

fn candle(timeframe: Timeframe, open_time_ms: i64, mid: Decimal, high: Decimal, low: Decimal) -> Candle {
    Candle {
        timeframe,
        open_time_ms,
        open: mid,
        high,
        low,
        close: mid,
        volume: dec!(50),
        closed: true,
    }
}

/// Monotonic tape, 100 ms between prints.
struct Tape {
    ts: i64,
}

impl Tape {
    fn new() -> Self {
        Self { ts: T0 }
    }

    fn next(&mut self, price: Decimal, size: Decimal, side: Side) -> Tick {
        self.ts += 100;
        Tick::new(self.ts, price, size, side)
    }

    /// Steady bid above the H1 low; sizes cycle 1, 2, 3 (48 bought).
    fn warmup(&mut self) -> Vec<Tick> {
        self.buys((0..24).map(|i| Decimal::from(1 + i % 3)))
    }

    fn buys(&mut self, sizes: impl IntoIterator<Item = Decimal>) -> Vec<Tick> {
        sizes
            .into_iter()
            .map(|size| self.next(dec!(100.5), size, Side::Buy))
            .collect()
    }

    fn sells(&mut self, prints: &[(Decimal, Decimal)]) -> Vec<Tick> {
        prints
            .iter()
            .map(|&(price, size)| self.next(price, size, Side::Sell))
            .collect()
    }

    /// Pierce the 100 low by 0.3% and hold for two more prints (13 sold).
    fn sweep(&mut self) -> Vec<Tick> {
        self.sells(&[(dec!(99.7), dec!(4)), (dec!(99.75), dec!(4)), (dec!(99.8), dec!(5))])
    }

    /// Back inside the level. After `warmup` and `sweep` the window holds
    /// 52 bought against 13 sold, an nOFI of exactly 0.6.
    fn reclaim(&mut self) -> Tick {
        self.next(dec!(100.05), dec!(4), Side::Buy)
    }
}

fn feed(p: &mut SymbolPipeline<PaperBroker>, ticks: &[Tick]) -> Vec<TickOutcome> {
    ticks
        .iter()
        .map(|t| p.on_tick(t).expect("tick accepted"))
        .collect()
}

fn losing_signal(ts: i64) -> Signal {
    Signal {
        symbol: "BTCUSDT".into(),
        side: Side::Buy,
        entry: dec!(101),
        stop_loss: dec!(100.8),
        take_profit: dec!(101.5),
        strength: 0.7,
        reason: "fixture".into(),
        level: Level {
            price: dec!(100.9),
            timeframe: Timeframe::H1,
            kind: LevelKind::Low,
            formed_at_ms: ts,
            touched: true,
        },
        created_at_ms: ts,
    }
}

fn emitted(outcomes: &[TickOutcome]) -> Vec<&Signal> {
    outcomes
        .iter()
        .filter_map(|o| match &o.evaluation {
            Evaluation::Emitted(s) => Some(s),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_sweep_of_h1_low_emits_one_buy() {
    let mut p = seeded(regime(Trend::Bullish, false), None);
    let level = p.levels().level(Timeframe::H1, LevelKind::Low).cloned();
    assert_eq!(level.map(|l| l.price), Some(dec!(100)));

    let mut tape = Tape::new();
    let mut outcomes = feed(&mut p, &tape.warmup());
    let sweep = feed(&mut p, &tape.sweep());
    assert!(sweep
        .iter()
        .all(|o| matches!(o.evaluation, Evaluation::Idle)));
    assert!(matches!(p.hunter().state(), HunterState::Sweeping(_)));
    outcomes.extend(sweep);

    let reclaim = p.on_tick(&tape.reclaim()).unwrap();
    assert!((reclaim.flow.nofi - 0.6).abs() < 1e-12);
    assert!(reclaim.flow.volume_z < 4.0);
    outcomes.push(reclaim);
    for _ in 0..5 {
        let t = tape.next(dec!(100.08), dec!(1), Side::Buy);
        outcomes.push(p.on_tick(&t).unwrap());
    }

    let signals = emitted(&outcomes);
    assert_eq!(signals.len(), 1);
    let s = signals[0];
    assert_eq!(s.side, Side::Buy);
    assert_eq!(s.stop_loss, dec!(99.7));
    assert_eq!(s.entry, dec!(100.05));
    assert_eq!(s.take_profit, dec!(100.15));

    let forwarded = outcomes.iter().find(|o| o.decision.is_some()).unwrap();
    let Some(RiskDecision::Approved { size }) = &forwarded.decision else {
        panic!("expected approval, got {:?}", forwarded.decision);
    };
    // 1% of 10 000 over a 0.35 stop.
    assert!((*size * dec!(0.35) - dec!(100)).abs() < dec!(0.0001));
    assert!(forwarded.opened.is_some());
    assert_eq!(p.broker().positions().len(), 1);
    assert_eq!(*p.hunter().state(), HunterState::Scanning);
}

#[test]
fn test_counter_trend_sweep_blocked_by_regime() {
    let mut p = seeded(regime(Trend::Bearish, false), None);
    let mut tape = Tape::new();
    let mut outcomes = feed(&mut p, &tape.warmup());
    outcomes.extend(feed(&mut p, &tape.sweep()));
    outcomes.push(p.on_tick(&tape.reclaim()).unwrap());

    assert!(emitted(&outcomes).is_empty());
    let blocked: Vec<_> = outcomes
        .iter()
        .filter_map(|o| match &o.evaluation {
            Evaluation::Blocked { signal, reason } => Some((signal, reason)),
            _ => None,
        })
        .collect();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].0.side, Side::Buy);
    assert_eq!(
        *blocked[0].1,
        GateBlock::NoDivergence {
            trend: Trend::Bearish
        }
    );

    // Nothing reached risk or the broker.
    assert!(outcomes.iter().all(|o| o.decision.is_none()));
    assert!(p.broker().positions().is_empty());
}

#[test]
fn test_fourth_signal_after_three_losses_rejected() {
    let mut p = seeded(regime(Trend::Bullish, false), None);
    let mut tape = Tape::new();

    for _ in 0..3 {
        let ts = tape.ts;
        p.broker_mut()
            .open(&losing_signal(ts), dec!(1), ts)
            .unwrap();
        let out = p
            .on_tick(&tape.next(dec!(100.7), dec!(2), Side::Buy))
            .unwrap();
        assert_eq!(out.closed.len(), 1);
        assert_eq!(out.closed[0].exit_reason, ExitReason::StopLoss);
        assert!(out.closed[0].pnl < Decimal::ZERO);
    }
    assert_eq!(p.risk().state().consecutive_losses, 3);

    feed(&mut p, &tape.warmup());
    feed(&mut p, &tape.sweep());
    let out = p.on_tick(&tape.reclaim()).unwrap();

    assert!(matches!(out.evaluation, Evaluation::Emitted(_)));
    let Some(RiskDecision::Rejected { reason }) = &out.decision else {
        panic!("expected rejection, got {:?}", out.decision);
    };
    assert_eq!(*reason, RejectReason::ConsecutiveLosses { count: 3 });
    assert_eq!(reason.code(), "consecutive-loss");
    assert!(out.opened.is_none());
    assert!(p.broker().positions().is_empty());
}

#[test]
fn test_volume_spike_trips_volatility_breaker() {
    let mut p = seeded(regime(Trend::Bullish, false), None);
    let mut tape = Tape::new();
    // Sizes alternate 1 and 3 through warmup and sweep: mean 2, std 1.
    feed(&mut p, &tape.buys((0..24).map(|i| if i % 2 == 0 { dec!(1) } else { dec!(3) })));
    feed(
        &mut p,
        &tape.sells(&[
            (dec!(99.7), dec!(1)),
            (dec!(99.75), dec!(3)),
            (dec!(99.8), dec!(1)),
            (dec!(99.75), dec!(3)),
        ]),
    );

    let out = p
        .on_tick(&tape.next(dec!(100.05), dec!(6.5), Side::Buy))
        .unwrap();

    assert!((out.flow.volume_z - 4.5).abs() < 1e-12);
    assert!(out.flow.nofi >= 0.5);
    assert!(matches!(out.evaluation, Evaluation::Emitted(_)));
    let Some(RiskDecision::Rejected { reason }) = &out.decision else {
        panic!("expected rejection, got {:?}", out.decision);
    };
    assert!(matches!(reason, RejectReason::VolatilityBreaker { .. }));
    assert_eq!(reason.code(), "volatility");
    assert!(p.broker().positions().is_empty());
}

#[test]
fn test_shallow_multi_tick_sweep_at_realistic_atr() {
    // ATR of 0.08 is 0.08% of price; 3 × ATR allows 0.24 of penetration.
    let mut p = seeded_with_atr(regime(Trend::Bullish, false), None, dec!(0.08));
    let mut tape = Tape::new();
    feed(&mut p, &tape.warmup());

    let sweep = feed(
        &mut p,
        &tape.sells(&[
            (dec!(99.92), dec!(2)),
            (dec!(99.9), dec!(2)),
            (dec!(99.87), dec!(2)),
            (dec!(99.89), dec!(2)),
        ]),
    );
    assert!(sweep.iter().all(|o| matches!(o.evaluation, Evaluation::Idle)));
    assert_eq!(p.hunter().state().episode().map(|e| e.wick), Some(dec!(99.87)));

    let out = p
        .on_tick(&tape.next(dec!(100.03), dec!(2), Side::Buy))
        .unwrap();
    let Evaluation::Emitted(signal) = &out.evaluation else {
        panic!("expected signal, got {:?}", out.evaluation);
    };
    assert_eq!(signal.stop_loss, dec!(99.87));
    assert_eq!(signal.take_profit, dec!(100.065));
    assert!(matches!(out.decision, Some(RiskDecision::Approved { .. })));
    assert!(out.opened.is_some());
}

#[test]
fn test_deep_pierce_at_realistic_atr_is_breakout() {
    let mut p = seeded_with_atr(regime(Trend::Bullish, false), None, dec!(0.08));
    let mut tape = Tape::new();
    let mut outcomes = feed(&mut p, &tape.warmup());

    let sweep = tape.sweep();
    outcomes.extend(feed(&mut p, &sweep[..1]));
    assert!(matches!(p.hunter().state(), HunterState::Sweeping(_)));
    // 0.3 beyond the level exceeds 3 × 0.08 on the next print beyond it.
    outcomes.extend(feed(&mut p, &sweep[1..2]));
    assert_eq!(*p.hunter().state(), HunterState::Scanning);

    outcomes.extend(feed(&mut p, &sweep[2..]));
    outcomes.push(p.on_tick(&tape.reclaim()).unwrap());
    assert!(emitted(&outcomes).is_empty());
    assert_eq!(*p.hunter().state(), HunterState::Scanning);
    assert!(p.broker().positions().is_empty());
}

// ---------------------------------------------------------------------------
// Pipeline plumbing
// ---------------------------------------------------------------------------

#[test]
fn test_late_tick_dropped_without_state_change() {
    let mut p = seeded(regime(Trend::Bullish, false), None);
    let mut tape = Tape::new();
    let ticks = tape.warmup();
    feed(&mut p, &ticks);

    let late = Tick::new(ticks[0].timestamp_ms, dec!(99), dec!(1), Side::Sell);
    let err = p.on_tick(&late).unwrap_err();
    assert!(matches!(err, EngineError::LateTick { .. }));
    assert!(!err.is_fatal());
    assert_eq!(*p.hunter().state(), HunterState::Scanning);
}

#[test]
fn test_flow_overflow_leaves_candles_untouched() {
    let mut p = seeded(regime(Trend::Bullish, false), None);
    let mut tape = Tape::new();
    feed(&mut p, &tape.warmup());
    let candle_before = p.levels().open_candle().cloned();
    assert!(candle_before.is_some());

    // Next minute, so an accepted tick would seal the open candle. The
    // size squared does not fit in a Decimal.
    let huge = Tick::new(tape.ts + 60_000, dec!(100.5), dec!(1_000_000_000_000_000), Side::Buy);
    let err = p.on_tick(&huge).unwrap_err();
    assert!(matches!(err, EngineError::NonFinite { .. }));
    assert!(!err.is_fatal());
    assert_eq!(p.levels().open_candle().cloned(), candle_before);

    // The rejected tick did not advance the clock either.
    assert!(p.on_tick(&tape.next(dec!(100.5), dec!(1), Side::Buy)).is_ok());
}

#[test]
fn test_invalid_tick_rejected() {
    let mut p = seeded(regime(Trend::Bullish, false), None);
    let err = p
        .on_tick(&Tick::new(T0, dec!(0), dec!(1), Side::Buy))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTick { .. }));
}

#[test]
fn test_flush_closes_at_last_price_and_writes_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = TradeLedger::open(dir.path(), "BTCUSDT").unwrap();
    let path = ledger.path().to_path_buf();
    let mut p = seeded(regime(Trend::Bullish, false), Some(ledger));

    let mut tape = Tape::new();
    feed(&mut p, &tape.warmup());
    feed(&mut p, &tape.sweep());
    p.on_tick(&tape.reclaim()).unwrap();
    p.on_tick(&tape.next(dec!(100.1), dec!(1), Side::Buy))
        .unwrap();
    assert_eq!(p.broker().positions().len(), 1);

    let closed = p.flush();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].exit_reason, ExitReason::Shutdown);
    assert!(p.broker().positions().is_empty());
    // Second flush has nothing left to close.
    assert!(p.flush().is_empty());

    let text = std::fs::read_to_string(path).unwrap();
    assert_eq!(text.lines().count(), 2);
    assert!(text.lines().nth(1).unwrap().contains(",BTCUSDT,buy,"));
}

#[tokio::test]
async fn test_run_drains_channel_then_flushes() {
    let mut p = seeded(regime(Trend::Bullish, false), None);
    let (tx, rx) = mpsc::channel(256);

    let mut tape = Tape::new();
    let mut ticks = tape.warmup();
    ticks.extend(tape.sweep());
    ticks.push(tape.reclaim());
    // A bad print in the middle is dropped, not fatal.
    ticks.push(Tick::new(tape.ts, dec!(-1), dec!(1), Side::Buy));
    ticks.push(tape.next(dec!(100.1), dec!(1), Side::Buy));

    for t in ticks {
        tx.send(MarketEvent::Tick(t)).await.unwrap();
    }
    drop(tx);

    p.run(rx, CancellationToken::new()).await.unwrap();

    // The open position was flattened on the way out.
    assert!(p.broker().positions().is_empty());
    assert_eq!(p.broker().stats().total_trades, 1);
}

#[tokio::test]
async fn test_run_stops_on_cancel() {
    let mut p = seeded(regime(Trend::Bullish, false), None);
    let (_tx, rx) = mpsc::channel::<MarketEvent>(8);
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    assert!(p.run(rx, shutdown).await.is_ok());
}
