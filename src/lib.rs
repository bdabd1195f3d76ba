//! Funding Rate Aggregator Library
//!
//! Polls perpetual-futures funding rates from Binance and Deribit, keeps them
//! in an append-only store and derives statistics, alerts, trends and
//! cross-venue arbitrage signals.

pub mod analysis;
pub mod config;
pub mod exchanges;
pub mod models;
pub mod scheduler;
pub mod store;
pub mod telemetry;

pub use analysis::RateAnalyzer;
pub use config::AggregatorConfig;
pub use models::{Exchange, RateSample, SeriesKey};
pub use scheduler::Aggregator;
pub use store::RateStore;
