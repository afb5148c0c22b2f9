//! Candle timeframes used by the engine.
//!
//! `M1` is the base unit synthesized from ticks; `H1` and `H4` carry the
//! liquidity levels; `M15` and `H1` feed the regime filter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported candle timeframes, ordered shortest to longest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    /// 1-minute base candles
    M1,
    /// 15-minute candles (regime divergence)
    M15,
    /// 1-hour candles (levels, macro trend)
    H1,
    /// 4-hour candles (levels)
    H4,
}

impl Timeframe {
    /// Binance kline interval string representation.
    #[must_use]
    pub fn as_binance_interval(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
        }
    }

    /// Duration in seconds.
    #[must_use]
    pub const fn duration_secs(&self) -> u64 {
        match self {
            Self::M1 => 60,
            Self::M15 => 900,
            Self::H1 => 3600,
            Self::H4 => 14400,
        }
    }

    /// Duration in milliseconds.
    #[must_use]
    pub const fn duration_ms(&self) -> u64 {
        self.duration_secs() * 1000
    }

    /// Start of the interval containing `timestamp_ms` (UTC-aligned).
    #[must_use]
    pub const fn bucket_start(&self, timestamp_ms: i64) -> i64 {
        let d = self.duration_ms() as i64;
        timestamp_ms.div_euclid(d) * d
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_binance_interval())
    }
}
