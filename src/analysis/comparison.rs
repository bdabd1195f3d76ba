//! Exchange comparison: latest rate per venue for each tracked asset.

use serde::Serialize;
use std::fmt;

use crate::models::{Exchange, RateSample};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetComparison {
    pub asset: String,
    pub rate_a: Option<f64>,
    pub rate_b: Option<f64>,
    /// Signed `rate_a - rate_b`; absent unless both venues reported
    pub spread: Option<f64>,
    pub flagged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeComparison {
    pub venue_a: Exchange,
    pub venue_b: Exchange,
    pub assets: Vec<AssetComparison>,
}

impl ExchangeComparison {
    /// Compare the most recent rate of each venue in `samples`.
    pub fn from_samples(
        samples: &[RateSample],
        assets: &[String],
        venues: (Exchange, Exchange),
        threshold: f64,
    ) -> Self {
        let latest = |exchange: Exchange, asset: &str| {
            samples
                .iter()
                .rev()
                .find(|s| s.exchange == exchange && s.symbol.starts_with(asset))
                .map(|s| s.rate)
        };

        let assets = assets
            .iter()
            .map(|asset| {
                let rate_a = latest(venues.0, asset);
                let rate_b = latest(venues.1, asset);
                let spread = rate_a.zip(rate_b).map(|(a, b)| a - b);
                AssetComparison {
                    asset: asset.clone(),
                    rate_a,
                    rate_b,
                    spread,
                    flagged: spread.is_some_and(|s| s.abs() > threshold.abs()),
                }
            })
            .collect();

        Self {
            venue_a: venues.0,
            venue_b: venues.1,
            assets,
        }
    }

    pub fn flagged(&self) -> impl Iterator<Item = &AssetComparison> {
        self.assets.iter().filter(|a| a.flagged)
    }
}

fn fmt_rate(rate: Option<f64>) -> String {
    rate.map(|r| format!("{r:.4}%")).unwrap_or_else(|| "n/a".to_string())
}

impl fmt::Display for ExchangeComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "=== Exchange Funding Rate Comparison ===")?;
        for a in &self.assets {
            write!(f, "\n\n{}:", a.asset)?;
            write!(f, "\n  {}: {}", self.venue_a.display_name(), fmt_rate(a.rate_a))?;
            write!(f, "\n  {}: {}", self.venue_b.display_name(), fmt_rate(a.rate_b))?;
            write!(f, "\n  Spread: {}", fmt_rate(a.spread))?;
            if a.flagged {
                write!(f, "\n  ⚠️ Potential arbitrage opportunity!")?;
            }
        }
        Ok(())
    }
}
