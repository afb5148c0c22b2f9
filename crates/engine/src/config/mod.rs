pub mod types;
pub mod validate;

pub use types::*;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Load and merge all config JSON files into a single [`EngineConfig`],
/// then apply environment variable overrides and validate.
///
/// Expected directory layout:
/// ```text
/// config/
///   app.json
///   stream.json
///   strategy.json
///   regime.json
///   risk.json
///   paper.json
///   telemetry.json   (optional)
/// ```
///
/// # Environment variable overrides
///
/// | Env Var               | Config Field                  |
/// |-----------------------|-------------------------------|
/// | `SWEEP_SYMBOL`        | `app.symbol`                  |
/// | `PAPER_BALANCE`       | `paper.starting_balance`      |
/// | `RISK_PER_TRADE_PCT`  | `risk.risk_per_trade_pct`     |
/// | `MAX_DAILY_LOSS_PCT`  | `risk.max_daily_loss_pct`     |
/// | `MAX_CONSECUTIVE_LOSSES` | `risk.max_consecutive_losses` |
/// | `BINANCE_WS_URL`      | `stream.ws_url`               |
/// | `BINANCE_REST_URL`    | `stream.rest_url`             |
/// | `REDIS_URL`           | `telemetry.redis_url`         |
/// | `TELEMETRY_ENABLED`   | `telemetry.enabled`           |
pub fn load_config(config_dir: &Path) -> Result<EngineConfig> {
    let read = |name: &str| -> Result<String> {
        let path = config_dir.join(name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))
    };

    let app: AppConfig =
        serde_json::from_str(&read("app.json")?).context("parsing app.json")?;

    let stream: StreamConfig =
        serde_json::from_str(&read("stream.json")?).context("parsing stream.json")?;

    let strategy: StrategyConfig =
        serde_json::from_str(&read("strategy.json")?).context("parsing strategy.json")?;

    let regime: RegimeConfig =
        serde_json::from_str(&read("regime.json")?).context("parsing regime.json")?;

    let risk: RiskConfig =
        serde_json::from_str(&read("risk.json")?).context("parsing risk.json")?;

    let paper: PaperConfig =
        serde_json::from_str(&read("paper.json")?).context("parsing paper.json")?;

    // Telemetry config is optional.
    let telemetry: Option<TelemetryConfig> = match read("telemetry.json") {
        Ok(contents) => {
            Some(serde_json::from_str(&contents).context("parsing telemetry.json")?)
        }
        Err(_) => None,
    };

    let mut config = EngineConfig {
        app,
        stream,
        strategy,
        regime,
        risk,
        paper,
        telemetry,
    };

    apply_env_overrides(&mut config);
    validate::validate_config(&config)?;

    Ok(config)
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides to the loaded config.
///
/// Only non-empty env vars take effect. Parse failures are skipped and the
/// JSON value remains.
fn apply_env_overrides(config: &mut EngineConfig) {
    if let Some(val) = env_string("SWEEP_SYMBOL") {
        info!(symbol = %val, "env override: SWEEP_SYMBOL");
        config.app.symbol = val.to_uppercase();
    }

    // -- Paper / risk --------------------------------------------------------
    if let Some(val) = env_decimal("PAPER_BALANCE") {
        info!(%val, "env override: PAPER_BALANCE");
        config.paper.starting_balance = val;
    }

    if let Some(val) = env_decimal("RISK_PER_TRADE_PCT") {
        info!(%val, "env override: RISK_PER_TRADE_PCT");
        config.risk.risk_per_trade_pct = val;
    }

    if let Some(val) = env_decimal("MAX_DAILY_LOSS_PCT") {
        info!(%val, "env override: MAX_DAILY_LOSS_PCT");
        config.risk.max_daily_loss_pct = val;
    }

    if let Some(val) = env_parse::<u32>("MAX_CONSECUTIVE_LOSSES") {
        info!(val, "env override: MAX_CONSECUTIVE_LOSSES");
        config.risk.max_consecutive_losses = val;
    }

    // -- Endpoints -----------------------------------------------------------
    if let Some(val) = env_string("BINANCE_WS_URL") {
        info!("env override: BINANCE_WS_URL");
        config.stream.ws_url = val;
    }

    if let Some(val) = env_string("BINANCE_REST_URL") {
        info!("env override: BINANCE_REST_URL");
        config.stream.rest_url = val;
    }

    // -- Telemetry -----------------------------------------------------------
    if let Some(telemetry) = config.telemetry.as_mut() {
        if let Some(val) = env_string("REDIS_URL") {
            info!("env override: REDIS_URL");
            telemetry.redis_url = val;
        }
        if let Some(val) = env_bool("TELEMETRY_ENABLED") {
            info!(enabled = val, "env override: TELEMETRY_ENABLED");
            telemetry.enabled = val;
        }
    }
}

/// Read a non-empty env var as a `String`.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Read a non-empty env var as a bool (`true`, `1`, `yes` → true).
fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

/// Read a non-empty env var and parse it as `T`.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

/// Read a non-empty env var and parse it as `Decimal`.
fn env_decimal(key: &str) -> Option<Decimal> {
    env_string(key).and_then(|v| Decimal::from_str(&v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serial_test::serial;
    use std::path::PathBuf;

    fn project_config_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("config")
    }

    // -----------------------------------------------------------------------
    // Helper: write a minimal set of config JSON files to a temp dir.
    // -----------------------------------------------------------------------

    fn write_test_configs(dir: &Path) {
        std::fs::write(
            dir.join("app.json"),
            r#"{ "symbol": "BTCUSDT", "logging": { "log_dir": "logs" } }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("stream.json"),
            r#"{
                "ws_url": "wss://stream.binance.com:9443",
                "rest_url": "https://api.binance.com",
                "reconnect_delay_ms": 1000,
                "max_reconnect_attempts": 5,
                "channel_capacity": 4096
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("strategy.json"),
            r#"{
                "imbalance": { "window_trades": 100, "min_samples": 20, "absorption_z": 2.0, "absorption_max_efficiency": 0.3 },
                "levels": { "h1_lookback": 24, "h4_lookback": 6, "atr_period": 14 },
                "hunter": {
                    "sweep_tolerance": "0.0005",
                    "max_sweep_duration_ms": 300000,
                    "confirmation_window_ms": 60000,
                    "nofi_threshold": 0.5,
                    "max_sweep_atr_mult": "3.0",
                    "tp_retracement": "0.5"
                }
            }"#,
        )
        .unwrap();

        std::fs::write(dir.join("regime.json"), r#"{ "adx_extreme": "50" }"#).unwrap();

        std::fs::write(
            dir.join("risk.json"),
            r#"{
                "risk_per_trade_pct": "1.0",
                "max_daily_loss_pct": "3.0",
                "max_consecutive_losses": 3,
                "max_volume_z": 4.0,
                "max_spread_pct": "0.1"
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("paper.json"),
            r#"{ "starting_balance": "10000", "commission_pct": "0.0005", "ledger_dir": "logs" }"#,
        )
        .unwrap();
    }

    fn write_telemetry_config(dir: &Path, enabled: bool, redis_url: &str) {
        std::fs::write(
            dir.join("telemetry.json"),
            format!(r#"{{ "enabled": {enabled}, "redis_url": "{redis_url}" }}"#),
        )
        .unwrap();
    }

    // -----------------------------------------------------------------------
    // Env cleanup helper, keeps serial tests independent.
    // -----------------------------------------------------------------------

    fn clean_engine_env() {
        for key in [
            "SWEEP_SYMBOL",
            "PAPER_BALANCE",
            "RISK_PER_TRADE_PCT",
            "MAX_DAILY_LOSS_PCT",
            "MAX_CONSECUTIVE_LOSSES",
            "BINANCE_WS_URL",
            "BINANCE_REST_URL",
            "REDIS_URL",
            "TELEMETRY_ENABLED",
        ] {
            std::env::remove_var(key);
        }
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[test]
    #[serial]
    fn test_load_real_configs() {
        clean_engine_env();
        let dir = project_config_dir();
        if !dir.exists() {
            eprintln!("skipping: config dir not found at {}", dir.display());
            return;
        }
        let config = load_config(&dir).expect("config should load and validate");
        assert_eq!(config.app.symbol, "BTCUSDT");
        assert_eq!(config.strategy.imbalance.window_trades, 100);
        assert_eq!(config.risk.max_consecutive_losses, 3);
        clean_engine_env();
    }

    #[test]
    #[serial]
    fn test_load_test_configs() {
        clean_engine_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        let config = load_config(tmp.path()).expect("test config should load");
        assert_eq!(config.app.symbol, "BTCUSDT");
        assert_eq!(config.strategy.hunter.sweep_tolerance, dec!(0.0005));
        assert_eq!(config.paper.starting_balance, dec!(10000));
        assert!(config.telemetry.is_none());
        clean_engine_env();
    }

    #[test]
    #[serial]
    fn test_partial_section_uses_defaults() {
        clean_engine_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        let config = load_config(tmp.path()).unwrap();
        // regime.json only sets adx_extreme
        assert_eq!(config.regime.ema_trend_period, 200);
        assert_eq!(config.regime.refresh_interval_secs, 900);
        assert!(config.stream.seed_levels);
        clean_engine_env();
    }

    #[test]
    #[serial]
    fn test_missing_config_file_errors() {
        clean_engine_env();
        let tmp = tempfile::tempdir().unwrap();
        let err = load_config(tmp.path()).unwrap_err();
        assert!(
            err.to_string().contains("failed to read config file"),
            "expected file-not-found error, got: {err}"
        );
        clean_engine_env();
    }

    #[test]
    #[serial]
    fn test_env_override_paper_balance() {
        clean_engine_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("PAPER_BALANCE", "2500.5");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.paper.starting_balance, dec!(2500.5));
        clean_engine_env();
    }

    #[test]
    #[serial]
    fn test_env_override_symbol_uppercased() {
        clean_engine_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("SWEEP_SYMBOL", "ethusdt");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.app.symbol, "ETHUSDT");
        clean_engine_env();
    }

    #[test]
    #[serial]
    fn test_env_override_redis_url() {
        clean_engine_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        write_telemetry_config(tmp.path(), true, "redis://localhost:6379");

        std::env::set_var("REDIS_URL", "redis://cache.internal:6380");
        let config = load_config(tmp.path()).unwrap();
        let telemetry = config.telemetry.expect("telemetry section present");
        assert_eq!(telemetry.redis_url, "redis://cache.internal:6380");
        assert_eq!(telemetry.channel, crate::constants::DEFAULT_TELEMETRY_CHANNEL);
        clean_engine_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_string_ignored() {
        clean_engine_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("PAPER_BALANCE", "");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.paper.starting_balance, dec!(10000));
        clean_engine_env();
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_parse_ignored() {
        clean_engine_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("MAX_DAILY_LOSS_PCT", "three");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.risk.max_daily_loss_pct, dec!(3.0));
        clean_engine_env();
    }

    #[test]
    #[serial]
    fn test_env_override_consecutive_losses() {
        clean_engine_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("MAX_CONSECUTIVE_LOSSES", "5");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.risk.max_consecutive_losses, 5);
        clean_engine_env();
    }

    #[test]
    #[serial]
    fn test_telemetry_enabled_without_url_rejected() {
        clean_engine_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        write_telemetry_config(tmp.path(), true, "");

        let err = load_config(tmp.path()).unwrap_err();
        assert!(
            err.to_string().contains("telemetry.redis_url"),
            "expected redis url error, got: {err}"
        );
        clean_engine_env();
    }

    #[test]
    #[serial]
    fn test_negative_balance_override_rejected() {
        clean_engine_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("PAPER_BALANCE", "-10");
        let err = load_config(tmp.path()).unwrap_err();
        assert!(
            err.to_string().contains("starting_balance"),
            "expected balance error, got: {err}"
        );
        clean_engine_env();
    }
}
