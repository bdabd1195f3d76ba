//! Integration tests for the aggregation loop
//!
//! Drives [`Aggregator`] with in-memory venues and a temporary data directory.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use funding_aggregator::config::AggregatorConfig;
use funding_aggregator::exchanges::ExchangeClient;
use funding_aggregator::scheduler::{Aggregator, VenueFeed};
use funding_aggregator::{Exchange, RateSample, RateStore};

struct FixedVenue {
    exchange: Exchange,
    rates: Option<Vec<(&'static str, f64)>>,
}

impl FixedVenue {
    fn healthy(exchange: Exchange, rates: Vec<(&'static str, f64)>) -> Self {
        Self {
            exchange,
            rates: Some(rates),
        }
    }

    fn down(exchange: Exchange) -> Self {
        Self {
            exchange,
            rates: None,
        }
    }
}

#[async_trait]
impl ExchangeClient for FixedVenue {
    fn exchange(&self) -> Exchange {
        self.exchange
    }

    async fn fetch_current_rates(&self, instruments: &[String]) -> Result<BTreeMap<String, f64>> {
        let rates = self
            .rates
            .as_ref()
            .ok_or_else(|| anyhow!("{} unreachable", self.exchange))?;
        Ok(rates
            .iter()
            .filter(|(name, _)| instruments.iter().any(|i| i == name))
            .map(|(name, rate)| (name.to_string(), *rate))
            .collect())
    }

    async fn fetch_historical_rates(
        &self,
        _instrument: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<RateSample>> {
        Ok(Vec::new())
    }
}

/// Venue whose current-rate call never completes
struct HungVenue {
    exchange: Exchange,
}

#[async_trait]
impl ExchangeClient for HungVenue {
    fn exchange(&self) -> Exchange {
        self.exchange
    }

    async fn fetch_current_rates(&self, _instruments: &[String]) -> Result<BTreeMap<String, f64>> {
        std::future::pending().await
    }

    async fn fetch_historical_rates(
        &self,
        _instrument: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<RateSample>> {
        std::future::pending().await
    }
}

fn instruments(exchange: Exchange) -> Vec<String> {
    match exchange {
        Exchange::Binance => vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
        Exchange::Deribit => vec!["BTC-PERPETUAL".to_string(), "ETH-PERPETUAL".to_string()],
    }
}

fn feed(venue: FixedVenue) -> VenueFeed {
    let instruments = instruments(venue.exchange);
    VenueFeed::new(Arc::new(venue), instruments)
}

fn hung_feed(exchange: Exchange) -> VenueFeed {
    VenueFeed::new(Arc::new(HungVenue { exchange }), instruments(exchange))
}

fn binance() -> FixedVenue {
    FixedVenue::healthy(
        Exchange::Binance,
        vec![("BTCUSDT", 0.01), ("ETHUSDT", 0.012)],
    )
}

fn deribit() -> FixedVenue {
    FixedVenue::healthy(
        Exchange::Deribit,
        vec![("BTC-PERPETUAL", 0.05), ("ETH-PERPETUAL", 0.015)],
    )
}

fn config(dir: &tempfile::TempDir) -> AggregatorConfig {
    AggregatorConfig {
        data_dir: dir.path().to_path_buf(),
        ..AggregatorConfig::default()
    }
}

#[tokio::test]
async fn test_cycle_appends_and_persists_one_batch() {
    let dir = tempfile::tempdir().unwrap();
    let mut agg = Aggregator::new(config(&dir), vec![feed(binance()), feed(deribit())]).unwrap();

    let report = agg.fetch_cycle().await.unwrap();
    assert_eq!(report.appended, 4);
    assert!(report.failed.is_empty());
    assert!(report.persisted);

    let samples = agg.store().all();
    assert!(samples.iter().all(|s| s.timestamp == report.timestamp));
    assert!(samples.iter().all(|s| s.symbol == "BTC" || s.symbol == "ETH"));

    let reloaded = RateStore::load(agg.rates_path()).unwrap();
    assert_eq!(reloaded.all(), samples);
}

#[tokio::test]
async fn test_failing_venue_does_not_stop_the_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut agg = Aggregator::new(
        config(&dir),
        vec![feed(binance()), feed(FixedVenue::down(Exchange::Deribit))],
    )
    .unwrap();

    let report = agg.fetch_cycle().await.unwrap();
    assert_eq!(report.appended, 2);
    assert_eq!(report.failed, [Exchange::Deribit]);
    assert!(agg
        .store()
        .all()
        .iter()
        .all(|s| s.exchange == Exchange::Binance));
}

#[tokio::test]
async fn test_all_venues_down_is_a_cycle_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut agg = Aggregator::new(
        config(&dir),
        vec![
            feed(FixedVenue::down(Exchange::Binance)),
            feed(FixedVenue::down(Exchange::Deribit)),
        ],
    )
    .unwrap();

    assert!(agg.fetch_cycle().await.is_err());
    assert!(agg.store().is_empty());
    assert!(!agg.rates_path().exists());
}

#[tokio::test]
async fn test_restart_resumes_from_persisted_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut first = Aggregator::new(config(&dir), vec![feed(binance())]).unwrap();
    first.fetch_cycle().await.unwrap();
    first.fetch_cycle().await.unwrap();

    let mut second = Aggregator::new(config(&dir), vec![feed(deribit())]).unwrap();
    assert_eq!(second.store().len(), 4);
    second.fetch_cycle().await.unwrap();
    assert_eq!(second.store().len(), 6);
    assert_eq!(RateStore::load(second.rates_path()).unwrap().len(), 6);
}

#[tokio::test]
async fn test_analysis_sees_cross_venue_spread() {
    let dir = tempfile::tempdir().unwrap();
    let mut agg = Aggregator::new(config(&dir), vec![feed(binance()), feed(deribit())]).unwrap();
    agg.fetch_cycle().await.unwrap();
    agg.fetch_cycle().await.unwrap();

    let result = agg.analyze(Utc::now());
    // BTC spread 0.04 each cycle; ETH spread 0.003 stays under the threshold.
    assert_eq!(result.arbitrage_opportunities.len(), 2);
    assert!(result
        .arbitrage_opportunities
        .iter()
        .all(|o| o.symbol == "BTC"));
    // Rates did not move between cycles.
    assert!(result.alerts.is_empty());

    let path = agg.run_analysis(Utc::now()).unwrap();
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("summary_"));
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("binance_BTC:"));
    assert!(text.contains("deribit_ETH:"));
}

#[tokio::test]
async fn test_shutdown_writes_final_summary() {
    let dir = tempfile::tempdir().unwrap();
    let mut agg = Aggregator::new(config(&dir), vec![feed(binance()), feed(deribit())]).unwrap();

    let path = agg
        .run(tokio::time::sleep(Duration::from_millis(100)))
        .await
        .expect("final summary path");

    assert!(!agg.store().is_empty());
    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("final_summary_"));
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("=== Funding Rate Summary ==="));
}

#[tokio::test]
async fn test_immediate_shutdown_reports_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut agg = Aggregator::new(config(&dir), vec![feed(binance())]).unwrap();

    let path = agg.run(async {}).await.expect("final summary path");
    assert!(agg.store().is_empty());
    assert_eq!(
        std::fs::read_to_string(path).unwrap(),
        "No data available for analysis"
    );
}

#[tokio::test]
async fn test_hung_venue_is_cut_off_by_fetch_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let config = AggregatorConfig {
        fetch_timeout_secs: 1,
        ..config(&dir)
    };
    let mut agg = Aggregator::new(config, vec![feed(binance()), hung_feed(Exchange::Deribit)])
        .unwrap();

    let started = Instant::now();
    let report = agg.fetch_cycle().await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(900), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
    assert_eq!(report.failed, [Exchange::Deribit]);
    assert_eq!(report.appended, 2);
    assert!(agg
        .store()
        .all()
        .iter()
        .all(|s| s.exchange == Exchange::Binance));
}

#[tokio::test]
async fn test_shutdown_during_fetch_abandons_it() {
    let dir = tempfile::tempdir().unwrap();
    let config = AggregatorConfig {
        fetch_timeout_secs: 3600,
        ..config(&dir)
    };
    let mut agg = Aggregator::new(config, vec![hung_feed(Exchange::Binance)]).unwrap();

    let started = Instant::now();
    let path = agg
        .run(tokio::time::sleep(Duration::from_millis(200)))
        .await
        .expect("final summary path");

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(agg.store().is_empty());
    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("final_summary_"));
    assert_eq!(
        std::fs::read_to_string(path).unwrap(),
        "No data available for analysis"
    );
}

#[tokio::test]
async fn test_unwritable_final_summary_still_returns() {
    let dir = tempfile::tempdir().unwrap();
    // A regular file where the data directory should be.
    let blocker = dir.path().join("data");
    std::fs::write(&blocker, "not a directory").unwrap();
    let config = AggregatorConfig {
        data_dir: blocker,
        ..AggregatorConfig::default()
    };
    let mut agg = Aggregator::new(config, vec![feed(binance())]).unwrap();

    assert!(agg.run(async {}).await.is_none());
}
