use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::market_data::Side;
use super::timeframe::Timeframe;

/// Which side of the range a level marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelKind {
    High,
    Low,
}

impl LevelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }

    /// Direction of the reversal trade after this level is swept.
    ///
    /// Stops resting below a low are sell liquidity; a sweep and reclaim of
    /// a low is a buy, and the mirror holds for highs.
    pub fn reversal_side(&self) -> Side {
        match self {
            Self::Low => Side::Buy,
            Self::High => Side::Sell,
        }
    }
}

/// A liquidity extreme (swing high or low) on a timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub timeframe: Timeframe,
    pub kind: LevelKind,
    /// Open time of the candle that printed the extreme, unix ms.
    pub formed_at_ms: i64,
    /// Price has traded beyond the level since it formed.
    pub touched: bool,
}

impl Level {
    /// Identity that survives the `touched` flag flipping.
    pub fn key(&self) -> LevelKey {
        LevelKey {
            timeframe: self.timeframe,
            kind: self.kind,
            price: self.price,
            formed_at_ms: self.formed_at_ms,
        }
    }

    /// Whether `price` trades beyond the level.
    pub fn is_breached_by(&self, price: Decimal) -> bool {
        match self.kind {
            LevelKind::High => price > self.price,
            LevelKind::Low => price < self.price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LevelKey {
    pub timeframe: Timeframe,
    pub kind: LevelKind,
    pub price: Decimal,
    pub formed_at_ms: i64,
}
