use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::types::EngineConfig;

/// Validate invariants across the merged config that serde alone cannot enforce.
///
/// Called automatically by [`super::load_config`]. Every violation is
/// collected so a broken config is reported in one pass.
pub fn validate_config(config: &EngineConfig) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();

    validate_app_config(config, &mut errors);
    validate_stream_config(config, &mut errors);
    validate_strategy_config(config, &mut errors);
    validate_regime_config(config, &mut errors);
    validate_risk_config(config, &mut errors);
    validate_paper_config(config, &mut errors);
    validate_telemetry_config(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        let msg = format!(
            "Configuration validation failed ({} error{}):\n  - {}",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" },
            errors.join("\n  - ")
        );
        bail!("{msg}");
    }
}

// ---------------------------------------------------------------------------
// App / stream
// ---------------------------------------------------------------------------

fn validate_app_config(config: &EngineConfig, errors: &mut Vec<String>) {
    let symbol = &config.app.symbol;
    if symbol.is_empty() {
        errors.push("app.symbol: must not be empty".into());
    } else if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        errors.push(format!(
            "app.symbol: '{symbol}' must be an exchange symbol like BTCUSDT"
        ));
    }

    if config.app.logging.log_dir.is_empty() {
        errors.push("app.logging.log_dir: must not be empty".into());
    }
}

fn validate_stream_config(config: &EngineConfig, errors: &mut Vec<String>) {
    let stream = &config.stream;

    if !stream.ws_url.starts_with("ws://") && !stream.ws_url.starts_with("wss://") {
        errors.push(format!(
            "stream.ws_url: '{}' must start with ws:// or wss://",
            stream.ws_url
        ));
    }
    if !stream.rest_url.starts_with("http://") && !stream.rest_url.starts_with("https://") {
        errors.push(format!(
            "stream.rest_url: '{}' must start with http:// or https://",
            stream.rest_url
        ));
    }
    if stream.channel_capacity == 0 {
        errors.push("stream.channel_capacity: must be > 0".into());
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

fn validate_strategy_config(config: &EngineConfig, errors: &mut Vec<String>) {
    let imb = &config.strategy.imbalance;
    if imb.window_trades == 0 {
        errors.push("strategy.imbalance.window_trades: must be > 0".into());
    }
    if imb.min_samples < 2 || imb.min_samples > imb.window_trades {
        errors.push(format!(
            "strategy.imbalance.min_samples: {} must be in [2, window_trades={}]",
            imb.min_samples, imb.window_trades
        ));
    }
    if !(imb.absorption_z > 0.0) {
        errors.push("strategy.imbalance.absorption_z: must be > 0".into());
    }
    if !(imb.absorption_max_efficiency > 0.0 && imb.absorption_max_efficiency <= 1.0) {
        errors.push("strategy.imbalance.absorption_max_efficiency: must be in (0, 1]".into());
    }

    let lv = &config.strategy.levels;
    if lv.h1_lookback == 0 || lv.h4_lookback == 0 {
        errors.push("strategy.levels: lookbacks must be > 0".into());
    }
    if lv.atr_period == 0 {
        errors.push("strategy.levels.atr_period: must be > 0".into());
    }

    let h = &config.strategy.hunter;
    if h.sweep_tolerance < Decimal::ZERO || h.sweep_tolerance >= dec!(0.1) {
        errors.push(format!(
            "strategy.hunter.sweep_tolerance: {} must be in [0, 0.1)",
            h.sweep_tolerance
        ));
    }
    if h.max_sweep_duration_ms <= 0 {
        errors.push("strategy.hunter.max_sweep_duration_ms: must be > 0".into());
    }
    if h.confirmation_window_ms <= 0 {
        errors.push("strategy.hunter.confirmation_window_ms: must be > 0".into());
    }
    if !(h.nofi_threshold > 0.0 && h.nofi_threshold <= 1.0) {
        errors.push(format!(
            "strategy.hunter.nofi_threshold: {} must be in (0, 1]",
            h.nofi_threshold
        ));
    }
    if h.max_sweep_atr_mult <= Decimal::ZERO {
        errors.push("strategy.hunter.max_sweep_atr_mult: must be > 0".into());
    }
    if h.tp_retracement <= Decimal::ZERO {
        errors.push("strategy.hunter.tp_retracement: must be > 0".into());
    }
}

// ---------------------------------------------------------------------------
// Regime
// ---------------------------------------------------------------------------

fn validate_regime_config(config: &EngineConfig, errors: &mut Vec<String>) {
    let r = &config.regime;

    if r.refresh_interval_secs == 0 {
        errors.push("regime.refresh_interval_secs: must be > 0".into());
    }
    if r.freshness_secs == 0 {
        errors.push("regime.freshness_secs: must be > 0".into());
    }
    if r.ema_trend_period == 0 || r.ema_short_period == 0 || r.adx_period == 0 {
        errors.push("regime: indicator periods must be > 0".into());
    }
    if r.adx_extreme <= Decimal::ZERO || r.adx_extreme > dec!(100) {
        errors.push(format!(
            "regime.adx_extreme: {} must be in (0, 100]",
            r.adx_extreme
        ));
    }
    // EMA200 and ADX both need history beyond their period.
    let h1_needed = r.ema_trend_period.max(2 * r.adx_period + 1);
    if (r.h1_candles as usize) < h1_needed {
        errors.push(format!(
            "regime.h1_candles: {} is fewer than the {h1_needed} required by EMA/ADX",
            r.h1_candles
        ));
    }
    if (r.m15_candles as usize) < r.ema_short_period {
        errors.push(format!(
            "regime.m15_candles: {} is fewer than ema_short_period={}",
            r.m15_candles, r.ema_short_period
        ));
    }
}

// ---------------------------------------------------------------------------
// Risk / paper
// ---------------------------------------------------------------------------

fn validate_risk_config(config: &EngineConfig, errors: &mut Vec<String>) {
    let r = &config.risk;

    for (name, val) in [
        ("risk_per_trade_pct", r.risk_per_trade_pct),
        ("max_daily_loss_pct", r.max_daily_loss_pct),
        ("max_spread_pct", r.max_spread_pct),
    ] {
        if val <= Decimal::ZERO || val > dec!(100) {
            errors.push(format!("risk.{name}: {val} must be in (0, 100]"));
        }
    }
    if r.max_consecutive_losses == 0 {
        errors.push("risk.max_consecutive_losses: must be > 0".into());
    }
    if !(r.max_volume_z > 0.0) {
        errors.push("risk.max_volume_z: must be > 0".into());
    }
}

fn validate_paper_config(config: &EngineConfig, errors: &mut Vec<String>) {
    let p = &config.paper;

    if p.starting_balance <= Decimal::ZERO {
        errors.push(format!(
            "paper.starting_balance: {} must be > 0",
            p.starting_balance
        ));
    }
    if p.commission_pct < Decimal::ZERO || p.commission_pct >= Decimal::ONE {
        errors.push(format!(
            "paper.commission_pct: {} must be in [0, 1)",
            p.commission_pct
        ));
    }
    if p.ledger_dir.is_empty() {
        errors.push("paper.ledger_dir: must not be empty".into());
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

fn validate_telemetry_config(config: &EngineConfig, errors: &mut Vec<String>) {
    let Some(t) = config.telemetry.as_ref() else {
        return;
    };
    if !t.enabled {
        return;
    }

    if t.redis_url.is_empty() {
        errors.push("telemetry.redis_url: required when telemetry is enabled".into());
    } else if !t.redis_url.starts_with("redis://") && !t.redis_url.starts_with("rediss://") {
        errors.push(format!(
            "telemetry.redis_url: '{}' must start with redis:// or rediss://",
            t.redis_url
        ));
    }
    if t.channel.is_empty() {
        errors.push("telemetry.channel: must not be empty".into());
    }
    if t.pulse_interval_ms <= 0 {
        errors.push("telemetry.pulse_interval_ms: must be > 0".into());
    }
    if t.queue_capacity == 0 {
        errors.push("telemetry.queue_capacity: must be > 0".into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::*;

    fn valid_config() -> EngineConfig {
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

    #[test]
    fn test_defaults_are_valid() {
        validate_config(&valid_config()).expect("defaults should validate");
    }

    #[test]
    fn test_min_samples_above_window_rejected() {
        let mut c = valid_config();
        c.strategy.imbalance.window_trades = 10;
        c.strategy.imbalance.min_samples = 20;
        let err = validate_config(&c).expect_err("should fail");
        assert!(err.to_string().contains("min_samples"));
    }

    #[test]
    fn test_nofi_threshold_bounds() {
        let mut c = valid_config();
        c.strategy.hunter.nofi_threshold = 1.5;
        let err = validate_config(&c).expect_err("should fail");
        assert!(err.to_string().contains("nofi_threshold"));
    }

    #[test]
    fn test_short_h1_history_rejected() {
        let mut c = valid_config();
        c.regime.h1_candles = 100;
        let err = validate_config(&c).expect_err("EMA200 needs 200 candles");
        assert!(err.to_string().contains("regime.h1_candles"));
    }

    #[test]
    fn test_errors_are_collected() {
        let mut c = valid_config();
        c.app.symbol = String::new();
        c.risk.risk_per_trade_pct = Decimal::ZERO;
        c.paper.commission_pct = dec!(1.5);
        let err = validate_config(&c).expect_err("should fail").to_string();
        assert!(err.contains("3 errors"), "got: {err}");
        assert!(err.contains("app.symbol"));
        assert!(err.contains("risk.risk_per_trade_pct"));
        assert!(err.contains("paper.commission_pct"));
    }

    #[test]
    fn test_disabled_telemetry_not_validated() {
        let mut c = valid_config();
        c.telemetry = Some(TelemetryConfig {
            enabled: false,
            redis_url: String::new(),
            channel: String::new(),
            pulse_interval_ms: 0,
            queue_capacity: 0,
        });
        validate_config(&c).expect("disabled telemetry is not checked");
    }

    #[test]
    fn test_bad_ws_scheme_rejected() {
        let mut c = valid_config();
        c.stream.ws_url = "https://stream.binance.com".into();
        let err = validate_config(&c).expect_err("should fail");
        assert!(err.to_string().contains("stream.ws_url"));
    }
}
