//! Exchange clients
//!
//! Each venue turns its native funding payload into percentage rates keyed by
//! instrument name. Everything leaving this module is already in percent.

pub mod binance;
pub mod deribit;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::models::{Exchange, RateSample};

pub use binance::BinanceClient;
pub use deribit::{ChartLength, DeribitClient};

/// Quote and contract suffixes stripped when deriving the canonical asset name
const SYMBOL_SUFFIXES: [&str; 5] = ["USDT", "USDC", "BUSD", "USD", "PERP"];

/// Exchange fractions are converted to percentages before reaching the core.
pub const PERCENT: f64 = 100.0;

#[async_trait::async_trait]
pub trait ExchangeClient: Send + Sync {
    fn exchange(&self) -> Exchange;

    /// Current funding rate (percent) per instrument.
    ///
    /// Instruments whose payload is missing or malformed are left out. `Err`
    /// means nothing at all could be fetched.
    async fn fetch_current_rates(&self, instruments: &[String]) -> Result<BTreeMap<String, f64>>;

    /// Historical funding rates for one instrument between `start` and `end`,
    /// ordered by timestamp, with canonical symbols.
    async fn fetch_historical_rates(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RateSample>>;
}

/// Map a venue instrument name to its asset: `BTCUSDT` and `BTC-PERPETUAL` are both `BTC`.
pub fn canonical_symbol(instrument: &str) -> String {
    let upper = instrument.trim().to_ascii_uppercase();
    let base = upper.split(['-', '_']).next().unwrap_or_default();

    for suffix in SYMBOL_SUFFIXES {
        if let Some(stripped) = base.strip_suffix(suffix) {
            if !stripped.is_empty() {
                return stripped.to_string();
            }
        }
    }
    base.to_string()
}

/// Parse an exchange fraction (number or numeric string) into a finite percentage.
pub(crate) fn fraction_to_percent(value: &serde_json::Value) -> Option<f64> {
    let fraction = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    let pct = fraction * PERCENT;
    pct.is_finite().then_some(pct)
}
