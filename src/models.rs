use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Funding-rate venues
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exchange {
    Binance,
    Deribit,
}

impl Exchange {
    pub const ALL: [Exchange; 2] = [Exchange::Binance, Exchange::Deribit];

    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Binance => "binance",
            Exchange::Deribit => "deribit",
        }
    }

    /// Human-readable venue name for reports
    pub fn display_name(&self) -> &'static str {
        match self {
            Exchange::Binance => "Binance",
            Exchange::Deribit => "Deribit",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(Exchange::Binance),
            "deribit" => Ok(Exchange::Deribit),
            other => Err(anyhow::anyhow!("unknown exchange: {other}")),
        }
    }
}

/// One funding-rate observation.
///
/// `rate` is a percentage (exchange fractions are multiplied by 100 before a
/// sample is built) and is always finite. [`RateSample::new`] is the only
/// constructor that enforces that, so this type is serialize-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateSample {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub exchange: Exchange,
    pub rate: f64,
}

impl RateSample {
    /// Build a sample, rejecting NaN and infinite rates.
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: impl Into<String>,
        exchange: Exchange,
        rate: f64,
    ) -> Option<Self> {
        if !rate.is_finite() {
            return None;
        }
        Some(Self {
            timestamp,
            symbol: symbol.into(),
            exchange,
            rate,
        })
    }

    pub fn series_key(&self) -> SeriesKey {
        SeriesKey {
            symbol: self.symbol.clone(),
            exchange: self.exchange,
        }
    }
}

/// Identity of a rate series: one symbol on one venue
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: String,
    pub exchange: Exchange,
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.exchange, self.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_round_trip_through_str() {
        for ex in Exchange::ALL {
            assert_eq!(ex.as_str().parse::<Exchange>().unwrap(), ex);
        }
        assert_eq!(" Deribit ".parse::<Exchange>().unwrap(), Exchange::Deribit);
        assert!("okx".parse::<Exchange>().is_err());
    }

    #[test]
    fn test_sample_rejects_non_finite_rate() {
        let now = Utc::now();
        assert!(RateSample::new(now, "BTC", Exchange::Binance, f64::NAN).is_none());
        assert!(RateSample::new(now, "BTC", Exchange::Binance, f64::INFINITY).is_none());

        let sample = RateSample::new(now, "BTC", Exchange::Binance, -0.01).unwrap();
        assert_eq!(sample.series_key().to_string(), "binance_BTC");
    }
}
