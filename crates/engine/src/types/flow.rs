use serde::{Deserialize, Serialize};

/// Rolling order-flow state after the latest trade.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderFlowSnapshot {
    /// Normalized order-flow imbalance in [-1, 1]; positive = buy pressure.
    pub nofi: f64,
    /// Latest trade size in standard deviations from the trailing mean.
    pub volume_z: f64,
    /// Heavy participation without price displacement.
    pub absorption: bool,
    /// Kaufman efficiency ratio of the window's price path in [0, 1].
    pub efficiency_ratio: f64,
    /// Trades currently in the window.
    pub samples: usize,
}
