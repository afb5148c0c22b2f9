//! Execution venue seam.
//!
//! The pipeline only talks to [`ExecutionAdapter`]; the paper broker is the
//! one implementation today. Close events reach the risk manager through
//! the provided [`ExecutionAdapter::monitor`], so every venue reports each
//! closed position exactly once.

use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::core::risk::RiskManager;
use crate::errors::EngineError;
use crate::types::{ClosedTrade, Position, Signal, Tick};

pub trait ExecutionAdapter {
    /// Venue-specific performance summary.
    type Stats: Serialize + fmt::Debug;

    /// Open a position for an approved signal.
    ///
    /// Fails with [`EngineError::PositionAlreadyOpen`] when the symbol
    /// already has one.
    fn open(&mut self, signal: &Signal, size: Decimal, timestamp_ms: i64)
        -> Result<Position, EngineError>;

    fn has_open_position(&self, symbol: &str) -> bool;

    /// Close every position whose stop or target the tick touched.
    ///
    /// Each position is returned once and then forgotten.
    fn poll_closed(&mut self, tick: &Tick) -> Vec<ClosedTrade>;

    /// Flatten everything at `price`.
    fn close_all(&mut self, price: Decimal, timestamp_ms: i64) -> Vec<ClosedTrade>;

    /// Account balance after all realized PnL.
    fn balance(&self) -> Decimal;

    fn stats(&self) -> Self::Stats;

    /// Poll for closes and report each one to the risk manager.
    fn monitor(&mut self, tick: &Tick, risk: &mut RiskManager) -> Vec<ClosedTrade> {
        let mut balance = self.balance();
        let closed = self.poll_closed(tick);
        record_outcomes(&closed, &mut balance, risk);
        closed
    }

    /// [`Self::close_all`] with the same reporting guarantee as [`Self::monitor`].
    fn flatten(&mut self, price: Decimal, timestamp_ms: i64, risk: &mut RiskManager) -> Vec<ClosedTrade> {
        let mut balance = self.balance();
        let closed = self.close_all(price, timestamp_ms);
        record_outcomes(&closed, &mut balance, risk);
        closed
    }
}

/// `balance` is the balance before the first trade; each trade is recorded
/// against the balance it was realized on.
fn record_outcomes(closed: &[ClosedTrade], balance: &mut Decimal, risk: &mut RiskManager) {
    for trade in closed {
        risk.record_outcome(trade, *balance);
        *balance += trade.pnl;
    }
}
