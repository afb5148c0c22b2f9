pub mod flow;
pub mod level;
pub mod market_data;
pub mod position;
pub mod regime;
pub mod signal;
pub mod timeframe;

pub use flow::OrderFlowSnapshot;
pub use level::{Level, LevelKey, LevelKind};
pub use market_data::{Candle, MarketEvent, Quote, Side, Tick};
pub use position::{ClosedTrade, ExitReason, Position, TradeResult};
pub use regime::{RegimeSnapshot, Trend};
pub use signal::Signal;
pub use timeframe::Timeframe;
