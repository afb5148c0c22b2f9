//! Simulated execution venue.
//!
//! Fills pay a fixed commission on each side: buys enter at
//! `entry × (1 + c)` and exit at `exit × (1 − c)`, sells mirror it. Stops and
//! targets fill at their own price, not at the tick that crossed them, to
//! emulate resting orders. One open position per symbol.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::config::PaperConfig;
use crate::errors::EngineError;
use crate::execution::ExecutionAdapter;
use crate::types::{ClosedTrade, ExitReason, Position, Side, Signal, Tick, TradeResult};

/// Running performance of the paper account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperStats {
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate_pct: Decimal,
    /// Gross wins over gross losses; `None` until a losing trade exists.
    pub profit_factor: Option<Decimal>,
    pub max_drawdown_pct: Decimal,
    pub net_pnl: Decimal,
    pub balance: Decimal,
    pub active_positions: usize,
}

pub struct PaperBroker {
    commission_pct: Decimal,
    starting_balance: Decimal,
    balance: Decimal,
    peak_balance: Decimal,
    max_drawdown_pct: Decimal,
    gross_win: Decimal,
    gross_loss: Decimal,
    wins: u32,
    losses: u32,
    positions: Vec<Position>,
}

impl PaperBroker {
    pub fn new(config: &PaperConfig) -> Self {
        info!(
            balance = %config.starting_balance,
            commission_pct = %config.commission_pct,
            "paper broker initialised"
        );
        Self {
            commission_pct: config.commission_pct,
            starting_balance: config.starting_balance,
            balance: config.starting_balance,
            peak_balance: config.starting_balance,
            max_drawdown_pct: Decimal::ZERO,
            gross_win: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
            wins: 0,
            losses: 0,
            positions: Vec::new(),
        }
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    fn close(&mut self, position: Position, exit: Decimal, reason: ExitReason, ts: i64) -> ClosedTrade {
        let c = self.commission_pct;
        let adjusted_exit = match position.side {
            Side::Buy => exit * (Decimal::ONE - c),
            Side::Sell => exit * (Decimal::ONE + c),
        };
        let pnl = match position.side {
            Side::Buy => (adjusted_exit - position.fill_price) * position.size,
            Side::Sell => (position.fill_price - adjusted_exit) * position.size,
        };
        let result = TradeResult::from_pnl(pnl);

        self.balance += pnl;
        if pnl > Decimal::ZERO {
            self.gross_win += pnl;
            self.wins += 1;
        } else {
            self.gross_loss += pnl.abs();
            self.losses += 1;
        }
        self.peak_balance = self.peak_balance.max(self.balance);
        if self.peak_balance > Decimal::ZERO {
            let dd = (self.peak_balance - self.balance) / self.peak_balance * dec!(100);
            self.max_drawdown_pct = self.max_drawdown_pct.max(dd);
        }

        let trade = ClosedTrade {
            id: position.id,
            symbol: position.symbol,
            side: position.side,
            entry: position.fill_price,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            size: position.size,
            exit_price: adjusted_exit,
            pnl,
            result,
            exit_reason: reason,
            opened_at_ms: position.opened_at_ms,
            closed_at_ms: ts,
        };
        self.log_close(&trade);
        trade
    }

    fn log_open(&self, pos: &Position) {
        info!("╔══════════════════════════════════════════════════════════════════╗");
        info!("║              PAPER TRADE: POSITION OPENED                        ║");
        info!("╠══════════════════════════════════════════════════════════════════╣");
        info!("║ Id: {}  Symbol: {}  Side: {}", pos.id, pos.symbol, pos.side.as_str().to_uppercase());
        info!("║ Signal Entry: {}  Fill: {}", pos.entry, pos.fill_price.round_dp(8));
        info!("║ Size: {}", pos.size.round_dp(8));
        info!("║ ─────────────────────────────────────────────────────────────── ║");
        info!("║ Stop Loss: {}", pos.stop_loss);
        info!("║ Take Profit: {}", pos.take_profit);
        info!("║ Balance: {}", self.balance.round_dp(2));
        info!("╚══════════════════════════════════════════════════════════════════╝");
    }

    fn log_close(&self, t: &ClosedTrade) {
        let hold_mins = (t.closed_at_ms - t.opened_at_ms) as f64 / 60_000.0;
        info!("╔══════════════════════════════════════════════════════════════════╗");
        info!("║              PAPER TRADE: POSITION CLOSED                        ║");
        info!("╠══════════════════════════════════════════════════════════════════╣");
        info!("║ Id: {}  Symbol: {}  Side: {}", t.id, t.symbol, t.side.as_str().to_uppercase());
        info!("║ Entry: {}  Exit: {}", t.entry.round_dp(8), t.exit_price.round_dp(8));
        info!("║ ─────────────────────────────────────────────────────────────── ║");
        info!("║ Result: {}  P&L: {:+}", t.result.as_str(), t.pnl.round_dp(4));
        info!("║ Exit Reason: {}", t.exit_reason.as_str());
        info!("║ Hold Duration: {:.1} min", hold_mins);
        info!("║ Balance: {}", self.balance.round_dp(2));
        info!("╚══════════════════════════════════════════════════════════════════╝");
    }
}

impl ExecutionAdapter for PaperBroker {
    type Stats = PaperStats;

    fn open(&mut self, signal: &Signal, size: Decimal, timestamp_ms: i64) -> Result<Position, EngineError> {
        if self.has_open_position(&signal.symbol) {
            return Err(EngineError::PositionAlreadyOpen {
                symbol: signal.symbol.clone(),
            });
        }

        let c = self.commission_pct;
        let fill_price = match signal.side {
            Side::Buy => signal.entry * (Decimal::ONE + c),
            Side::Sell => signal.entry * (Decimal::ONE - c),
        };
        let id = Uuid::new_v4().simple().to_string()[..8].to_string();

        let position = Position {
            id,
            symbol: signal.symbol.clone(),
            side: signal.side,
            entry: signal.entry,
            fill_price,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            size,
            opened_at_ms: timestamp_ms,
        };
        self.log_open(&position);
        self.positions.push(position.clone());
        Ok(position)
    }

    fn has_open_position(&self, symbol: &str) -> bool {
        self.positions.iter().any(|p| p.symbol == symbol)
    }

    fn poll_closed(&mut self, tick: &Tick) -> Vec<ClosedTrade> {
        let price = tick.price;
        let (hit, open): (Vec<Position>, Vec<Position>) =
            std::mem::take(&mut self.positions)
                .into_iter()
                .partition(|p| exit_for(p, price).is_some());
        self.positions = open;

        hit.into_iter()
            .filter_map(|p| {
                let (exit, reason) = exit_for(&p, price)?;
                Some(self.close(p, exit, reason, tick.timestamp_ms))
            })
            .collect()
    }

    fn close_all(&mut self, price: Decimal, timestamp_ms: i64) -> Vec<ClosedTrade> {
        std::mem::take(&mut self.positions)
            .into_iter()
            .map(|p| self.close(p, price, ExitReason::Shutdown, timestamp_ms))
            .collect()
    }

    fn balance(&self) -> Decimal {
        self.balance
    }

    fn stats(&self) -> PaperStats {
        let total = self.wins + self.losses;
        let win_rate_pct = if total > 0 {
            Decimal::from(self.wins) / Decimal::from(total) * dec!(100)
        } else {
            Decimal::ZERO
        };
        let profit_factor = if self.gross_loss > Decimal::ZERO {
            Some(self.gross_win / self.gross_loss)
        } else {
            None
        };
        PaperStats {
            total_trades: total,
            wins: self.wins,
            losses: self.losses,
            win_rate_pct: win_rate_pct.round_dp(1),
            profit_factor: profit_factor.map(|p| p.round_dp(2)),
            max_drawdown_pct: self.max_drawdown_pct.round_dp(2),
            net_pnl: self.balance - self.starting_balance,
            balance: self.balance,
            active_positions: self.positions.len(),
        }
    }
}

/// Resting stop / target touched by `price`, filled at the order's price.
fn exit_for(p: &Position, price: Decimal) -> Option<(Decimal, ExitReason)> {
    let (stop_hit, target_hit) = match p.side {
        Side::Buy => (price <= p.stop_loss, price >= p.take_profit),
        Side::Sell => (price >= p.stop_loss, price <= p.take_profit),
    };
    if stop_hit {
        Some((p.stop_loss, ExitReason::StopLoss))
    } else if target_hit {
        Some((p.take_profit, ExitReason::TakeProfit))
    } else {
        None
    }
}
