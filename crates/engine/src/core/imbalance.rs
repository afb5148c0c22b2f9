//! Rolling order-flow statistics over a trailing trade-count window.
//!
//! Every push is O(1): the window keeps running sums that are adjusted for
//! the entering and the evicted trade, never rescanned.
//!
//! - **nOFI**: `Σ(sign × size) / Σ size`, clamped to [-1, 1].
//! - **Volume z-score**: the incoming trade size against the mean and
//!   population deviation of the window *before* it is folded in.
//! - **Efficiency ratio**: Kaufman's `|last − first| / Σ|Δprice|` over the
//!   window; 0 when price did not move at all.
//! - **Absorption**: high z-score without displacement (low efficiency).

use std::collections::VecDeque;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::config::ImbalanceConfig;
use crate::errors::EngineError;
use crate::types::{OrderFlowSnapshot, Tick};

#[derive(Debug, Clone, Copy)]
struct FlowSample {
    signed: Decimal,
    size: Decimal,
    price: Decimal,
    /// `|price − previous price|`; zero for the first trade seen.
    abs_change: Decimal,
}

#[derive(Debug, Clone, Copy, Default)]
struct RollingSums {
    signed: Decimal,
    size: Decimal,
    size_sq: Decimal,
    abs_change: Decimal,
}

impl RollingSums {
    fn add(&self, s: &FlowSample, size_sq: Decimal) -> Option<Self> {
        Some(Self {
            signed: self.signed.checked_add(s.signed)?,
            size: self.size.checked_add(s.size)?,
            size_sq: self.size_sq.checked_add(size_sq)?,
            abs_change: self.abs_change.checked_add(s.abs_change)?,
        })
    }
}

/// A validated trade whose effect on the window is computed but not applied.
#[derive(Debug, Clone, Copy)]
pub struct PendingFlow {
    sample: FlowSample,
    sums: RollingSums,
    volume_z: f64,
}

pub struct ImbalanceTracker {
    config: ImbalanceConfig,
    window: VecDeque<FlowSample>,
    sums: RollingSums,
    last_price: Option<Decimal>,
    last: OrderFlowSnapshot,
}

impl ImbalanceTracker {
    pub fn new(config: ImbalanceConfig) -> Self {
        let capacity = config.window_trades.max(1);
        Self {
            config,
            window: VecDeque::with_capacity(capacity),
            sums: RollingSums::default(),
            last_price: None,
            last: OrderFlowSnapshot::default(),
        }
    }

    /// Fold one trade into the window and return the updated snapshot.
    pub fn push(&mut self, tick: &Tick) -> Result<OrderFlowSnapshot, EngineError> {
        let pending = self.prepare(tick)?;
        Ok(self.commit(pending))
    }

    /// Validate `tick` and compute every new aggregate without touching the
    /// window. A rejected tick leaves the tracker as it was.
    pub fn prepare(&self, tick: &Tick) -> Result<PendingFlow, EngineError> {
        tick.validate()?;

        let volume_z = self.z_score(tick.size)?;

        let sample = FlowSample {
            signed: tick.size * tick.side.sign(),
            size: tick.size,
            price: tick.price,
            abs_change: self
                .last_price
                .map(|p| (tick.price - p).abs())
                .unwrap_or(Decimal::ZERO),
        };
        let size_sq = tick.size.checked_mul(tick.size).ok_or_else(|| overflow("size²"))?;
        let sums = self.sums.add(&sample, size_sq).ok_or_else(|| overflow("flow sums"))?;
        Ok(PendingFlow {
            sample,
            sums,
            volume_z,
        })
    }

    /// Apply an update produced by [`Self::prepare`] on the current state.
    pub fn commit(&mut self, pending: PendingFlow) -> OrderFlowSnapshot {
        let PendingFlow {
            sample,
            mut sums,
            volume_z,
        } = pending;

        self.window.push_back(sample);
        if self.window.len() > self.config.window_trades.max(1) {
            if let Some(old) = self.window.pop_front() {
                sums.signed -= old.signed;
                sums.size -= old.size;
                sums.size_sq -= old.size * old.size;
                sums.abs_change -= old.abs_change;
            }
        }
        self.sums = sums;
        self.last_price = Some(sample.price);

        let nofi = self.nofi();
        let efficiency_ratio = self.efficiency_ratio();
        let absorption = volume_z > self.config.absorption_z
            && efficiency_ratio < self.config.absorption_max_efficiency;

        self.last = OrderFlowSnapshot {
            nofi,
            volume_z,
            absorption,
            efficiency_ratio,
            samples: self.window.len(),
        };
        self.last
    }

    /// Snapshot after the most recent accepted trade.
    pub fn snapshot(&self) -> OrderFlowSnapshot {
        self.last
    }

    fn nofi(&self) -> f64 {
        if self.sums.size <= Decimal::ZERO {
            return 0.0;
        }
        let ratio = (self.sums.signed / self.sums.size).to_f64().unwrap_or(0.0);
        ratio.clamp(-1.0, 1.0)
    }

    fn z_score(&self, size: Decimal) -> Result<f64, EngineError> {
        let n = self.window.len();
        if n < self.config.min_samples.max(2) {
            return Ok(0.0);
        }
        let n_d = Decimal::from(n as u64);
        let mean = self.sums.size / n_d;
        // Population variance; clamp tiny negatives from cancellation.
        let variance = (self.sums.size_sq / n_d - mean * mean).max(Decimal::ZERO);

        let variance = variance.to_f64().ok_or_else(|| overflow("variance"))?;
        let std = variance.sqrt();
        if std == 0.0 {
            return Ok(0.0);
        }
        let diff = (size - mean).to_f64().ok_or_else(|| overflow("z-score"))?;
        let z = diff / std;
        if !z.is_finite() {
            return Err(EngineError::NonFinite {
                what: "volume z-score".into(),
            });
        }
        Ok(z)
    }

    fn efficiency_ratio(&self) -> f64 {
        let (Some(first), Some(last)) = (self.window.front(), self.window.back()) else {
            return 0.0;
        };
        // The front sample's change points outside the window.
        let path = self.sums.abs_change - first.abs_change;
        if path <= Decimal::ZERO {
            return 0.0;
        }
        let er = ((last.price - first.price).abs() / path).to_f64().unwrap_or(0.0);
        er.clamp(0.0, 1.0)
    }
}

fn overflow(what: &str) -> EngineError {
    EngineError::NonFinite {
        what: what.to_string(),
    }
}
