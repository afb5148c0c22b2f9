use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ---------------------------------------------------------------------------
// Order flow
// ---------------------------------------------------------------------------

/// Trailing trade-count window for nOFI and the volume z-score.
pub const DEFAULT_FLOW_WINDOW_TRADES: usize = 100;

/// Samples required before the z-score is reported as non-zero.
pub const DEFAULT_FLOW_MIN_SAMPLES: usize = 20;

pub const DEFAULT_ABSORPTION_Z: f64 = 2.0;
pub const DEFAULT_ABSORPTION_MAX_EFFICIENCY: f64 = 0.3;

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

/// Sealed H1 candles considered for the H1 high/low (one day).
pub const DEFAULT_H1_LOOKBACK: usize = 24;

/// Sealed H4 candles considered for the H4 high/low (one day).
pub const DEFAULT_H4_LOOKBACK: usize = 6;

/// Wilder ATR period over sealed base candles.
pub const DEFAULT_ATR_PERIOD: usize = 14;

// ---------------------------------------------------------------------------
// Hunter
// ---------------------------------------------------------------------------

/// Minimal penetration beyond a level (fraction of the level price).
pub const DEFAULT_SWEEP_TOLERANCE: Decimal = dec!(0.0005);
pub const DEFAULT_MAX_SWEEP_DURATION_MS: i64 = 300_000;
pub const DEFAULT_CONFIRMATION_WINDOW_MS: i64 = 60_000;
pub const DEFAULT_NOFI_THRESHOLD: f64 = 0.5;
pub const DEFAULT_MAX_SWEEP_ATR_MULT: Decimal = dec!(3.0);

/// Fibonacci midpoint used for the take-profit.
pub const DEFAULT_TP_RETRACEMENT: Decimal = dec!(0.5);

// ---------------------------------------------------------------------------
// Regime
// ---------------------------------------------------------------------------

pub const DEFAULT_REGIME_REFRESH_SECS: u64 = 900;
pub const DEFAULT_REGIME_FRESHNESS_SECS: u64 = 900;
pub const DEFAULT_EMA_TREND_PERIOD: usize = 200;
pub const DEFAULT_EMA_SHORT_PERIOD: usize = 50;
pub const DEFAULT_ADX_PERIOD: usize = 14;
pub const DEFAULT_ADX_EXTREME: Decimal = dec!(50);

// ---------------------------------------------------------------------------
// Risk
// ---------------------------------------------------------------------------

pub const DEFAULT_RISK_PER_TRADE_PCT: Decimal = dec!(1.0);
pub const DEFAULT_MAX_DAILY_LOSS_PCT: Decimal = dec!(3.0);
pub const DEFAULT_MAX_CONSECUTIVE_LOSSES: u32 = 3;
pub const DEFAULT_MAX_VOLUME_Z: f64 = 4.0;
pub const DEFAULT_MAX_SPREAD_PCT: Decimal = dec!(0.1);

// ---------------------------------------------------------------------------
// Paper execution
// ---------------------------------------------------------------------------

pub const DEFAULT_PAPER_BALANCE: Decimal = dec!(10_000);

/// 0.05% per side.
pub const DEFAULT_COMMISSION_PCT: Decimal = dec!(0.0005);

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

pub const DEFAULT_TELEMETRY_CHANNEL: &str = "sweep_engine:telemetry";
pub const DEFAULT_PULSE_INTERVAL_MS: i64 = 1_000;
pub const DEFAULT_TELEMETRY_QUEUE: usize = 1_024;
/// Bound on each Redis connect or publish, so a dead server cannot stall shutdown.
pub const REDIS_IO_TIMEOUT_MS: u64 = 2_000;
