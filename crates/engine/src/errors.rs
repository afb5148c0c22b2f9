use thiserror::Error;

/// Typed error hierarchy for the sweep engine.
///
/// Library-internal errors use specific variants; application code wraps with
/// `anyhow::Context` for propagation. Risk rejections are not errors and never
/// appear here, see [`crate::core::risk::RiskDecision`].
#[derive(Error, Debug)]
pub enum EngineError {
    // -- Input --------------------------------------------------------------
    #[error("invalid tick: {reason}")]
    InvalidTick { reason: String },

    #[error("late tick at {timestamp_ms} ms (open interval starts {open_ms} ms)")]
    LateTick { timestamp_ms: i64, open_ms: i64 },

    #[error("non-finite value computed for {what}")]
    NonFinite { what: String },

    // -- Data ---------------------------------------------------------------
    #[error("insufficient data for {what}: need {needed}, got {got}")]
    InsufficientData {
        what: String,
        needed: usize,
        got: usize,
    },

    #[error("data source unavailable: {name}")]
    DataUnavailable { name: String },

    // -- Execution ----------------------------------------------------------
    #[error("position already open for {symbol}")]
    PositionAlreadyOpen { symbol: String },

    #[error("fatal account state: {reason}")]
    FatalAccountState { reason: String },

    // -- Forwarded errors ---------------------------------------------------
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl EngineError {
    /// Whether the error must stop the pipeline rather than drop one update.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalAccountState { .. })
    }
}
