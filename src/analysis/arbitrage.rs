//! Arbitrage Detector
//!
//! Compares same-asset funding rates across two venues. Every distinct
//! timestamp of venue A is an anchor; the venue B sample closest to it within
//! the matching tolerance is its peer. A zero tolerance means exact timestamp
//! equality. Assets match instrument names by prefix, so `BTCUSDT` and
//! `BTC-PERPETUAL` both count as `BTC`.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::{Exchange, RateSample};

/// Default spread threshold (percentage points)
pub const DEFAULT_SPREAD_THRESHOLD: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbitrageOpportunity {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub spread: f64,
    pub venue_a: Exchange,
    pub rate_a: f64,
    pub venue_b: Exchange,
    pub rate_b: f64,
}

impl ArbitrageOpportunity {
    /// Venue paying the higher funding rate (the side to be short on)
    pub fn rich_venue(&self) -> Exchange {
        if self.rate_a >= self.rate_b {
            self.venue_a
        } else {
            self.venue_b
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArbitrageDetector {
    assets: Vec<String>,
    threshold: f64,
    tolerance: Duration,
    venues: (Exchange, Exchange),
}

impl ArbitrageDetector {
    pub fn new(assets: Vec<String>, threshold: f64, tolerance: Duration) -> Self {
        Self {
            assets,
            threshold: threshold.abs(),
            tolerance: tolerance.max(Duration::zero()),
            venues: (Exchange::Binance, Exchange::Deribit),
        }
    }

    pub fn with_venues(mut self, venue_a: Exchange, venue_b: Exchange) -> Self {
        self.venues = (venue_a, venue_b);
        self
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn venues(&self) -> (Exchange, Exchange) {
        self.venues
    }

    pub fn detect(&self, samples: &[RateSample]) -> Vec<ArbitrageOpportunity> {
        let (venue_a, venue_b) = self.venues;

        // Anchor groups keep arrival order within a timestamp.
        let mut anchors: BTreeMap<DateTime<Utc>, Vec<&RateSample>> = BTreeMap::new();
        let mut peers: BTreeMap<&str, Vec<&RateSample>> = BTreeMap::new();
        for sample in samples {
            if sample.exchange == venue_a {
                anchors.entry(sample.timestamp).or_default().push(sample);
            } else if sample.exchange == venue_b {
                if let Some(asset) = self.asset_for(&sample.symbol) {
                    peers.entry(asset).or_default().push(sample);
                }
            }
        }
        for candidates in peers.values_mut() {
            candidates.sort_by_key(|s| s.timestamp);
        }

        let mut opportunities = Vec::new();
        for (timestamp, group) in &anchors {
            for asset in &self.assets {
                let Some(a) = group.iter().find(|s| s.symbol.starts_with(asset.as_str())) else {
                    continue;
                };
                let Some(b) = peers
                    .get(asset.as_str())
                    .and_then(|candidates| self.nearest(candidates, *timestamp))
                else {
                    continue;
                };

                let spread = (a.rate - b.rate).abs();
                if spread > self.threshold {
                    opportunities.push(ArbitrageOpportunity {
                        timestamp: *timestamp,
                        symbol: asset.clone(),
                        spread,
                        venue_a,
                        rate_a: a.rate,
                        venue_b,
                        rate_b: b.rate,
                    });
                }
            }
        }
        opportunities
    }

    /// First tracked asset that prefixes `symbol`
    fn asset_for(&self, symbol: &str) -> Option<&str> {
        self.assets
            .iter()
            .find(|asset| symbol.starts_with(asset.as_str()))
            .map(String::as_str)
    }

    /// Closest candidate within tolerance; ties go to the earlier sample.
    fn nearest<'a>(
        &self,
        candidates: &[&'a RateSample],
        target: DateTime<Utc>,
    ) -> Option<&'a RateSample> {
        let lower = target - self.tolerance;
        let upper = target + self.tolerance;
        let start = candidates.partition_point(|s| s.timestamp < lower);

        let mut best: Option<(&'a RateSample, Duration)> = None;
        for &candidate in candidates[start..].iter().take_while(|s| s.timestamp <= upper) {
            let distance = if candidate.timestamp >= target {
                candidate.timestamp - target
            } else {
                target - candidate.timestamp
            };
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((candidate, distance));
            }
        }
        best.map(|(s, _)| s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn sample(secs: i64, symbol: &str, exchange: Exchange, rate: f64) -> RateSample {
        RateSample::new(at(secs), symbol, exchange, rate).unwrap()
    }

    fn exact_detector() -> ArbitrageDetector {
        ArbitrageDetector::new(
            vec!["BTC".into(), "ETH".into()],
            DEFAULT_SPREAD_THRESHOLD,
            Duration::zero(),
        )
    }

    #[test]
    fn test_spread_above_threshold_is_flagged() {
        let samples = vec![
            sample(0, "BTCUSDT", Exchange::Binance, 0.02),
            sample(0, "BTC-PERPETUAL", Exchange::Deribit, 0.05),
        ];
        let opps = exact_detector().detect(&samples);

        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].symbol, "BTC");
        assert!((opps[0].spread - 0.03).abs() < 1e-12);
        assert_eq!(opps[0].rate_a, 0.02);
        assert_eq!(opps[0].rate_b, 0.05);
        assert_eq!(opps[0].rich_venue(), Exchange::Deribit);
    }

    #[test]
    fn test_equal_rates_are_not_flagged() {
        let samples = vec![
            sample(0, "BTCUSDT", Exchange::Binance, 0.02),
            sample(0, "BTC-PERPETUAL", Exchange::Deribit, 0.02),
        ];
        assert!(exact_detector().detect(&samples).is_empty());
    }

    #[test]
    fn test_spread_equal_to_threshold_is_not_flagged() {
        let detector = ArbitrageDetector::new(vec!["BTC".into()], 0.25, Duration::zero());
        let samples = vec![
            sample(0, "BTCUSDT", Exchange::Binance, 0.5),
            sample(0, "BTC-PERPETUAL", Exchange::Deribit, 0.25),
        ];
        assert!(detector.detect(&samples).is_empty());

        let wider = vec![
            sample(0, "BTCUSDT", Exchange::Binance, 0.5),
            sample(0, "BTC-PERPETUAL", Exchange::Deribit, 0.125),
        ];
        assert_eq!(detector.detect(&wider).len(), 1);
    }

    #[test]
    fn test_missing_venue_skips_asset() {
        let samples = vec![
            sample(0, "BTCUSDT", Exchange::Binance, 0.02),
            sample(0, "ETH-PERPETUAL", Exchange::Deribit, 0.5),
            sample(0, "ETHUSDT", Exchange::Binance, 0.01),
            sample(60, "BTC-PERPETUAL", Exchange::Deribit, 0.5),
        ];
        let opps = exact_detector().detect(&samples);
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].symbol, "ETH");
    }

    #[test]
    fn test_exact_matching_ignores_near_misses() {
        let samples = vec![
            sample(0, "BTC", Exchange::Binance, 0.01),
            sample(5, "BTC", Exchange::Deribit, 0.09),
        ];
        assert!(exact_detector().detect(&samples).is_empty());
    }

    #[test]
    fn test_tolerance_matches_nearest_peer() {
        let detector = ArbitrageDetector::new(vec!["BTC".into()], 0.01, Duration::seconds(30));
        let samples = vec![
            sample(0, "BTCUSDT", Exchange::Binance, 0.01),
            sample(-20, "BTC-PERPETUAL", Exchange::Deribit, 0.50),
            sample(10, "BTC-PERPETUAL", Exchange::Deribit, 0.04),
            sample(45, "BTC-PERPETUAL", Exchange::Deribit, 0.90),
        ];
        let opps = detector.detect(&samples);
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].timestamp, at(0));
        assert_eq!(opps[0].rate_b, 0.04);
    }

    #[test]
    fn test_tolerance_ties_prefer_earlier_peer() {
        let detector = ArbitrageDetector::new(vec!["ETH".into()], 0.01, Duration::seconds(30));
        let samples = vec![
            sample(0, "ETHUSDT", Exchange::Binance, 0.01),
            sample(-10, "ETH-PERPETUAL", Exchange::Deribit, 0.20),
            sample(10, "ETH-PERPETUAL", Exchange::Deribit, 0.30),
        ];
        let opps = detector.detect(&samples);
        assert_eq!(opps[0].rate_b, 0.20);
    }

    #[test]
    fn test_one_opportunity_per_anchor_and_asset() {
        let samples = vec![
            sample(0, "BTCUSDT", Exchange::Binance, 0.01),
            sample(0, "BTC-PERPETUAL", Exchange::Deribit, 0.05),
            sample(0, "ETHUSDT", Exchange::Binance, 0.01),
            sample(0, "ETH-PERPETUAL", Exchange::Deribit, 0.06),
            sample(60, "BTCUSDT", Exchange::Binance, 0.01),
            sample(60, "BTC-PERPETUAL", Exchange::Deribit, 0.07),
        ];
        let opps = exact_detector().detect(&samples);
        let keys: Vec<_> = opps.iter().map(|o| (o.timestamp, o.symbol.as_str())).collect();
        assert_eq!(keys, [(at(0), "BTC"), (at(0), "ETH"), (at(60), "BTC")]);
    }

    #[test]
    fn test_reversed_venues() {
        let detector = exact_detector().with_venues(Exchange::Deribit, Exchange::Binance);
        let samples = vec![
            sample(0, "BTCUSDT", Exchange::Binance, 0.02),
            sample(0, "BTC-PERPETUAL", Exchange::Deribit, 0.05),
        ];
        let opps = detector.detect(&samples);
        assert_eq!(opps[0].venue_a, Exchange::Deribit);
        assert_eq!(opps[0].rate_a, 0.05);
    }
}
