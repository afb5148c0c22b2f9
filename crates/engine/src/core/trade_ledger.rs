//! Append-only CSV record of closed trades.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat};
use serde::Serialize;

use crate::errors::EngineError;
use crate::types::ClosedTrade;

#[derive(Debug, Serialize)]
struct LedgerRow<'a> {
    id: &'a str,
    timestamp: String,
    pair: &'a str,
    side: &'a str,
    entry: String,
    sl: String,
    tp: String,
    size: String,
    exit_price: String,
    pnl: String,
    result: &'a str,
}

impl<'a> From<&'a ClosedTrade> for LedgerRow<'a> {
    fn from(t: &'a ClosedTrade) -> Self {
        let timestamp = DateTime::from_timestamp_millis(t.closed_at_ms)
            .map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(|| t.closed_at_ms.to_string());
        Self {
            id: &t.id,
            timestamp,
            pair: &t.symbol,
            side: t.side.as_str(),
            entry: t.entry.round_dp(8).normalize().to_string(),
            sl: t.stop_loss.normalize().to_string(),
            tp: t.take_profit.normalize().to_string(),
            size: t.size.round_dp(8).normalize().to_string(),
            exit_price: t.exit_price.round_dp(8).normalize().to_string(),
            pnl: t.pnl.round_dp(8).normalize().to_string(),
            result: t.result.as_str(),
        }
    }
}

pub struct TradeLedger {
    path: PathBuf,
}

impl TradeLedger {
    /// `<dir>/simulated_trades_<SYMBOL>.csv`; the directory is created.
    pub fn open(dir: impl AsRef<Path>, symbol: &str) -> Result<Self, EngineError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(format!("simulated_trades_{symbol}.csv")),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, writing the header first when the file is new or empty.
    pub fn append(&self, trade: &ClosedTrade) -> Result<(), EngineError> {
        let needs_header = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer.serialize(LedgerRow::from(trade))?;
        writer.flush()?;
        Ok(())
    }
}
