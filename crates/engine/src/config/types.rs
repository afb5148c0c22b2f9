use rust_decimal::Decimal;
use serde::Deserialize;

use crate::constants::*;

// ---------------------------------------------------------------------------
// Top-level aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub app: AppConfig,
    pub stream: StreamConfig,
    pub strategy: StrategyConfig,
    pub regime: RegimeConfig,
    pub risk: RiskConfig,
    pub paper: PaperConfig,
    pub telemetry: Option<TelemetryConfig>,
}

// ---------------------------------------------------------------------------
// app.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Exchange symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: String,
}

// ---------------------------------------------------------------------------
// stream.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Binance WebSocket base, e.g. `wss://stream.binance.com:9443`.
    pub ws_url: String,
    /// Binance REST base, e.g. `https://api.binance.com`.
    pub rest_url: String,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Capacity of the tick channel between the stream and the pipeline.
    pub channel_capacity: usize,
    /// Seed levels and ATR from REST candles at startup.
    #[serde(default = "default_true")]
    pub seed_levels: bool,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// strategy.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub imbalance: ImbalanceConfig,
    #[serde(default)]
    pub levels: LevelConfig,
    #[serde(default)]
    pub hunter: HunterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImbalanceConfig {
    pub window_trades: usize,
    pub min_samples: usize,
    pub absorption_z: f64,
    pub absorption_max_efficiency: f64,
}

impl Default for ImbalanceConfig {
    fn default() -> Self {
        Self {
            window_trades: DEFAULT_FLOW_WINDOW_TRADES,
            min_samples: DEFAULT_FLOW_MIN_SAMPLES,
            absorption_z: DEFAULT_ABSORPTION_Z,
            absorption_max_efficiency: DEFAULT_ABSORPTION_MAX_EFFICIENCY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    pub h1_lookback: usize,
    pub h4_lookback: usize,
    pub atr_period: usize,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            h1_lookback: DEFAULT_H1_LOOKBACK,
            h4_lookback: DEFAULT_H4_LOOKBACK,
            atr_period: DEFAULT_ATR_PERIOD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HunterConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub sweep_tolerance: Decimal,
    pub max_sweep_duration_ms: i64,
    pub confirmation_window_ms: i64,
    pub nofi_threshold: f64,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_sweep_atr_mult: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub tp_retracement: Decimal,
}

impl Default for HunterConfig {
    fn default() -> Self {
        Self {
            sweep_tolerance: DEFAULT_SWEEP_TOLERANCE,
            max_sweep_duration_ms: DEFAULT_MAX_SWEEP_DURATION_MS,
            confirmation_window_ms: DEFAULT_CONFIRMATION_WINDOW_MS,
            nofi_threshold: DEFAULT_NOFI_THRESHOLD,
            max_sweep_atr_mult: DEFAULT_MAX_SWEEP_ATR_MULT,
            tp_retracement: DEFAULT_TP_RETRACEMENT,
        }
    }
}

// ---------------------------------------------------------------------------
// regime.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub refresh_interval_secs: u64,
    pub freshness_secs: u64,
    pub ema_trend_period: usize,
    pub ema_short_period: usize,
    pub adx_period: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub adx_extreme: Decimal,
    /// H1 candles fetched per refresh.
    pub h1_candles: u32,
    /// M15 candles fetched per refresh.
    pub m15_candles: u32,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: DEFAULT_REGIME_REFRESH_SECS,
            freshness_secs: DEFAULT_REGIME_FRESHNESS_SECS,
            ema_trend_period: DEFAULT_EMA_TREND_PERIOD,
            ema_short_period: DEFAULT_EMA_SHORT_PERIOD,
            adx_period: DEFAULT_ADX_PERIOD,
            adx_extreme: DEFAULT_ADX_EXTREME,
            h1_candles: 300,
            m15_candles: 120,
        }
    }
}

impl RegimeConfig {
    pub fn freshness_ms(&self) -> i64 {
        (self.freshness_secs as i64).saturating_mul(1000)
    }
}

// ---------------------------------------------------------------------------
// risk.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub risk_per_trade_pct: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_daily_loss_pct: Decimal,
    pub max_consecutive_losses: u32,
    pub max_volume_z: f64,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_spread_pct: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_trade_pct: DEFAULT_RISK_PER_TRADE_PCT,
            max_daily_loss_pct: DEFAULT_MAX_DAILY_LOSS_PCT,
            max_consecutive_losses: DEFAULT_MAX_CONSECUTIVE_LOSSES,
            max_volume_z: DEFAULT_MAX_VOLUME_Z,
            max_spread_pct: DEFAULT_MAX_SPREAD_PCT,
        }
    }
}

// ---------------------------------------------------------------------------
// paper.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PaperConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub starting_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub commission_pct: Decimal,
    /// Directory of the closed-trade CSV ledger.
    pub ledger_dir: String,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            starting_balance: DEFAULT_PAPER_BALANCE,
            commission_pct: DEFAULT_COMMISSION_PCT,
            ledger_dir: "logs".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// telemetry.json (optional)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub redis_url: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_pulse_interval")]
    pub pulse_interval_ms: i64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_channel() -> String {
    DEFAULT_TELEMETRY_CHANNEL.to_string()
}

fn default_pulse_interval() -> i64 {
    DEFAULT_PULSE_INTERVAL_MS
}

fn default_queue_capacity() -> usize {
    DEFAULT_TELEMETRY_QUEUE
}
