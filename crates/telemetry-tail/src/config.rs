//! Configuration for the telemetry tail.
//!
//! Environment variables win over an optional JSON file named by
//! `TAIL_CONFIG_PATH`; anything unset falls back to the engine defaults.

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_CHANNEL: &str = "sweep_engine:telemetry";
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct TailConfig {
    pub redis_url: String,
    pub channel: String,
    /// Event kinds to print; empty prints everything.
    pub events: Vec<String>,
    pub color: bool,
    pub reconnect_delay_secs: u64,
}

/// Optional JSON config overlay.
#[derive(Debug, Default, Deserialize)]
struct JsonConfig {
    redis_url: Option<String>,
    channel: Option<String>,
    events: Option<Vec<String>>,
    color: Option<bool>,
    reconnect_delay_secs: Option<u64>,
}

impl TailConfig {
    pub fn from_env() -> Result<Self> {
        let json_cfg = match env_string("TAIL_CONFIG_PATH") {
            Some(path) => {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file: {path}"))?;
                serde_json::from_str::<JsonConfig>(&contents)
                    .with_context(|| format!("failed to parse config file: {path}"))?
            }
            None => JsonConfig::default(),
        };

        let redis_url = env_string("REDIS_URL")
            .or(json_cfg.redis_url)
            .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());

        let channel = env_string("TELEMETRY_CHANNEL")
            .or(json_cfg.channel)
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());

        let events = env_string("TAIL_EVENTS")
            .map(|v| parse_event_list(&v))
            .or_else(|| {
                json_cfg
                    .events
                    .map(|list| list.iter().map(|e| e.trim().to_uppercase()).collect())
            })
            .unwrap_or_default();

        let color = env_string("TAIL_COLOR")
            .and_then(|v| parse_bool(&v))
            .or(json_cfg.color)
            .unwrap_or(true);

        let reconnect_delay_secs = env_string("TAIL_RECONNECT_DELAY")
            .and_then(|v| v.parse().ok())
            .or(json_cfg.reconnect_delay_secs)
            .unwrap_or(DEFAULT_RECONNECT_DELAY_SECS);

        Ok(Self {
            redis_url,
            channel,
            events,
            color,
            reconnect_delay_secs,
        })
    }

    pub fn wants(&self, event: &str) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == event)
    }
}

/// `"signal_gen, TRADE_UPDATE"` → `["SIGNAL_GEN", "TRADE_UPDATE"]`.
fn parse_event_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().to_uppercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clean_env() {
        for key in [
            "TAIL_CONFIG_PATH",
            "REDIS_URL",
            "TELEMETRY_CHANNEL",
            "TAIL_EVENTS",
            "TAIL_COLOR",
            "TAIL_RECONNECT_DELAY",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clean_env();
        let cfg = TailConfig::from_env().unwrap();
        assert_eq!(cfg.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(cfg.channel, DEFAULT_CHANNEL);
        assert!(cfg.events.is_empty());
        assert!(cfg.color);
        assert!(cfg.wants("MARKET_PULSE"));
    }

    #[test]
    #[serial]
    fn test_env_filter_and_color() {
        clean_env();
        std::env::set_var("TAIL_EVENTS", "signal_gen, trade_update,");
        std::env::set_var("TAIL_COLOR", "off");
        let cfg = TailConfig::from_env().unwrap();
        assert_eq!(cfg.events, vec!["SIGNAL_GEN", "TRADE_UPDATE"]);
        assert!(!cfg.color);
        assert!(cfg.wants("SIGNAL_GEN"));
        assert!(!cfg.wants("MARKET_PULSE"));
        clean_env();
    }

    #[test]
    #[serial]
    fn test_env_overrides_json() {
        clean_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail.json");
        std::fs::write(
            &path,
            r#"{ "redis_url": "redis://json:6379", "channel": "from_json", "events": ["level_update"] }"#,
        )
        .unwrap();
        std::env::set_var("TAIL_CONFIG_PATH", &path);
        std::env::set_var("TELEMETRY_CHANNEL", "from_env");

        let cfg = TailConfig::from_env().unwrap();
        assert_eq!(cfg.redis_url, "redis://json:6379");
        assert_eq!(cfg.channel, "from_env");
        assert_eq!(cfg.events, vec!["LEVEL_UPDATE"]);

        clean_env();
    }

    #[test]
    #[serial]
    fn test_unreadable_json_is_error() {
        clean_env();
        std::env::set_var("TAIL_CONFIG_PATH", "/nonexistent/tail.json");
        assert!(TailConfig::from_env().is_err());
        clean_env();
    }
}
