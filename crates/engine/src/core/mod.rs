pub mod data_service;
pub mod hunter;
pub mod imbalance;
pub mod indicators;
pub mod levels;
pub mod paper_broker;
pub mod pipeline;
pub mod regime;
pub mod risk;
pub mod telemetry;
pub mod trade_ledger;
pub mod trade_stream;
