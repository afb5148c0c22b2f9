use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::market_data::Side;

/// Macro trend direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Bullish,
    Bearish,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bullish => "BULLISH",
            Self::Bearish => "BEARISH",
        }
    }

    /// Trade direction that goes with the trend.
    pub fn aligned_side(&self) -> Side {
        match self {
            Self::Bullish => Side::Buy,
            Self::Bearish => Side::Sell,
        }
    }
}

/// Immutable macro context published by the regime refresh task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub trend: Trend,
    #[serde(with = "rust_decimal::serde::str")]
    pub adx: Decimal,
    /// 15-minute trend disagrees with the 1-hour trend.
    pub divergence: bool,
    #[serde(with = "rust_decimal::serde::str")]
    pub ema200_h1: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub last_close_h1: Decimal,
    /// Unix ms at which the inputs were fetched.
    pub fetched_at_ms: i64,
}

impl RegimeSnapshot {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.fetched_at_ms).max(0)
    }

    pub fn is_fresh(&self, now_ms: i64, freshness_ms: i64) -> bool {
        self.age_ms(now_ms) <= freshness_ms
    }
}
