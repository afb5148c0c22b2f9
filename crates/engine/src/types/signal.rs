use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::level::Level;
use super::market_data::Side;

/// Trade candidate produced by a confirmed sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: Side,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry: Decimal,
    /// Wick extreme of the sweep.
    #[serde(with = "rust_decimal::serde::str")]
    pub stop_loss: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub take_profit: Decimal,
    /// Confirmation strength, |nOFI| at confirmation in [0, 1].
    pub strength: f64,
    pub reason: String,
    /// The swept level.
    pub level: Level,
    pub created_at_ms: i64,
}

impl Signal {
    /// Absolute entry-to-stop distance.
    pub fn stop_distance(&self) -> Decimal {
        (self.entry - self.stop_loss).abs()
    }

    /// `sl < entry < tp` for buys, `tp < entry < sl` for sells.
    pub fn is_well_ordered(&self) -> bool {
        match self.side {
            Side::Buy => self.stop_loss < self.entry && self.entry < self.take_profit,
            Side::Sell => self.take_profit < self.entry && self.entry < self.stop_loss,
        }
    }
}
