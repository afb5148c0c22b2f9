//! One-line rendering of telemetry envelopes.

use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub data: Value,
}

fn color_for(event: &str) -> &'static str {
    match event {
        "MARKET_PULSE" => "\x1b[90m",
        "LEVEL_UPDATE" => "\x1b[36m",
        "SIGNAL_GEN" => "\x1b[33m",
        "TRADE_UPDATE" => "\x1b[32m",
        _ => "\x1b[35m",
    }
}

/// `HH:MM:SS.mmm` in UTC.
pub fn clock(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|d| d.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

pub fn render(envelope: &Envelope, color: bool) -> String {
    let body = summary(&envelope.event, &envelope.data);
    let time = clock(envelope.timestamp_ms);
    if color {
        format!(
            "{DIM}{time}{RESET} {}{:<12}{RESET} {body}",
            color_for(&envelope.event),
            envelope.event
        )
    } else {
        format!("{time} {:<12} {body}", envelope.event)
    }
}

fn summary(event: &str, d: &Value) -> String {
    match event {
        "MARKET_PULSE" => format!(
            "{} px={} nofi={} z={} er={} hunter={} trend={} adx={}",
            s(d, "symbol"),
            s(d, "price"),
            f(d, "nofi"),
            f(d, "volume_z"),
            f(d, "efficiency_ratio"),
            s(d, "hunter_state"),
            s(d, "trend"),
            s(d, "adx"),
        ),
        "LEVEL_UPDATE" => format!(
            "{} {} {} @ {}",
            s(d, "symbol"),
            s(d, "timeframe"),
            s(d, "kind"),
            s(d, "price"),
        ),
        "SIGNAL_GEN" => {
            let route = match d.get("blocked_by").and_then(Value::as_str) {
                Some(reason) => format!("blocked: {reason}"),
                None => "forwarded".to_string(),
            };
            format!(
                "{} {} entry={} sl={} tp={} strength={} [{route}]",
                s(d, "symbol"),
                s(d, "side").to_uppercase(),
                s(d, "entry"),
                s(d, "sl"),
                s(d, "tp"),
                f(d, "strength"),
            )
        }
        "TRADE_UPDATE" => match d.get("status").and_then(Value::as_str) {
            Some("opened") => {
                let p = &d["position"];
                format!(
                    "OPEN {} {} {} size={} fill={} sl={} tp={}",
                    s(p, "id"),
                    s(p, "symbol"),
                    s(p, "side").to_uppercase(),
                    s(p, "size"),
                    s(p, "fill_price"),
                    s(p, "stop_loss"),
                    s(p, "take_profit"),
                )
            }
            Some("closed") => {
                let t = &d["trade"];
                format!(
                    "CLOSE {} {} {} exit={} pnl={} ({}) balance={}",
                    s(t, "id"),
                    s(t, "symbol"),
                    s(t, "result"),
                    s(t, "exit_price"),
                    s(t, "pnl"),
                    s(t, "exit_reason"),
                    s(d, "balance"),
                )
            }
            _ => d.to_string(),
        },
        _ => d.to_string(),
    }
}

/// Field as display text; strings unquoted, missing as `-`.
fn s(v: &Value, key: &str) -> String {
    match v.get(key) {
        Some(Value::String(x)) => x.clone(),
        Some(Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    }
}

fn f(v: &Value, key: &str) -> String {
    match v.get(key).and_then(Value::as_f64) {
        Some(x) => format!("{x:.2}"),
        None => s(v, key),
    }
}
