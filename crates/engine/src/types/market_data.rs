use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::timeframe::Timeframe;
use crate::errors::EngineError;

/// Aggressor side of a trade, or the direction of a signal / position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// `+1` for buys, `-1` for sells.
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed trade from the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Exchange trade time, unix milliseconds.
    pub timestamp_ms: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    /// Aggressor side.
    pub side: Side,
}

impl Tick {
    pub fn new(timestamp_ms: i64, price: Decimal, size: Decimal, side: Side) -> Self {
        Self {
            timestamp_ms,
            price,
            size,
            side,
        }
    }

    /// Reject ticks that must never reach a rolling aggregate.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.price <= Decimal::ZERO {
            return Err(EngineError::InvalidTick {
                reason: format!("price {} is not positive", self.price),
            });
        }
        if self.size <= Decimal::ZERO {
            return Err(EngineError::InvalidTick {
                reason: format!("size {} is not positive", self.size),
            });
        }
        if self.timestamp_ms <= 0 {
            return Err(EngineError::InvalidTick {
                reason: format!("timestamp {} is not positive", self.timestamp_ms),
            });
        }
        Ok(())
    }
}

/// Best bid / ask snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    #[serde(with = "rust_decimal::serde::str")]
    pub bid: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub ask: Decimal,
    pub timestamp_ms: i64,
}

impl Quote {
    /// Bid/ask spread as a percentage of the mid price.
    ///
    /// `None` when the quote is empty or crossed.
    pub fn spread_pct(&self) -> Option<Decimal> {
        if self.bid <= Decimal::ZERO || self.ask < self.bid {
            return None;
        }
        let mid = (self.bid + self.ask) / dec!(2);
        Some((self.ask - self.bid) / mid * dec!(100))
    }
}

/// Events delivered by the tick source.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Tick(Tick),
    Quote(Quote),
}

/// OHLCV bar, either synthesized from ticks or fetched from the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timeframe: Timeframe,
    /// Interval start, unix milliseconds.
    pub open_time_ms: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    pub closed: bool,
}

impl Candle {
    /// Open a new candle from its first print.
    pub fn open_with(timeframe: Timeframe, open_time_ms: i64, price: Decimal, size: Decimal) -> Self {
        Self {
            timeframe,
            open_time_ms,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: size,
            closed: false,
        }
    }

    pub fn apply_trade(&mut self, price: Decimal, size: Decimal) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += size;
    }

    /// Fold a finer sealed candle into this (coarser) one.
    pub fn merge(&mut self, finer: &Candle) {
        self.high = self.high.max(finer.high);
        self.low = self.low.min(finer.low);
        self.close = finer.close;
        self.volume += finer.volume;
    }

    /// Exclusive end of the interval, unix milliseconds.
    pub fn close_time_ms(&self) -> i64 {
        self.open_time_ms + self.timeframe.duration_ms() as i64
    }

    /// `high ≥ max(open, close)` and `low ≤ min(open, close)`.
    pub fn is_consistent(&self) -> bool {
        self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
            && self.low <= self.high
    }
}
