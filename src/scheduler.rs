//! Aggregation loop
//!
//! [`Aggregator`] owns everything one process needs: configuration, the rate
//! store, the analyzer and the venue feeds. The loop is single-writer; fetches
//! of one cycle run concurrently, their results are merged into the store only
//! after all of them completed (or timed out).

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::analysis::{AlertDetector, AnalysisResult, ArbitrageDetector, RateAnalyzer, SummaryReport};
use crate::config::AggregatorConfig;
use crate::exchanges::{canonical_symbol, BinanceClient, DeribitClient, ExchangeClient};
use crate::models::{Exchange, RateSample};
use crate::store::RateStore;
use crate::telemetry::names;

pub const SUMMARY_PREFIX: &str = "summary";
pub const FINAL_SUMMARY_PREFIX: &str = "final_summary";
const SUMMARY_STAMP_FORMAT: &str = "%Y%m%d_%H%M";

/// One venue client plus the instruments polled on it
#[derive(Clone)]
pub struct VenueFeed {
    pub client: Arc<dyn ExchangeClient>,
    pub instruments: Vec<String>,
}

impl VenueFeed {
    pub fn new(client: Arc<dyn ExchangeClient>, instruments: Vec<String>) -> Self {
        Self {
            client,
            instruments,
        }
    }
}

/// HTTP feeds for every active venue in `config`.
pub fn venue_feeds(config: &AggregatorConfig) -> Result<Vec<VenueFeed>> {
    let timeout = config.fetch_timeout();
    let mut feeds = Vec::new();

    for exchange in Exchange::ALL {
        let venue = config.venue(exchange);
        if venue.is_active() {
            info!(
                exchange = %exchange,
                instruments = ?venue.instruments,
                authenticated = venue.has_credentials(),
                "🔌 venue enabled"
            );
        }
    }

    if config.binance.is_active() {
        let client = BinanceClient::new(
            &config.binance.base_url,
            config.binance.api_key.as_deref(),
            timeout,
        )?;
        feeds.push(VenueFeed::new(
            Arc::new(client),
            config.binance.instruments.clone(),
        ));
    }
    if config.deribit.is_active() {
        let client = DeribitClient::new(&config.deribit.base_url, timeout)?;
        feeds.push(VenueFeed::new(
            Arc::new(client),
            config.deribit.instruments.clone(),
        ));
    }
    Ok(feeds)
}

/// Outcome of one fetch cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub appended: usize,
    pub failed: Vec<Exchange>,
    pub persisted: bool,
}

pub struct Aggregator {
    config: AggregatorConfig,
    store: RateStore,
    analyzer: RateAnalyzer,
    feeds: Vec<VenueFeed>,
    rates_path: PathBuf,
    last_analysis: Option<Instant>,
}

impl Aggregator {
    /// Load the persisted store and wire the analyzer from `config`.
    pub fn new(config: AggregatorConfig, feeds: Vec<VenueFeed>) -> Result<Self> {
        let rates_path = config.rates_path();
        let store = RateStore::load(&rates_path)
            .with_context(|| format!("Failed to load rate store {}", rates_path.display()))?;
        if !store.is_empty() {
            info!(
                "📂 Loaded {} samples from {}",
                store.len(),
                rates_path.display()
            );
        }

        let analyzer = RateAnalyzer::new(
            AlertDetector::new(config.alert_threshold),
            ArbitrageDetector::new(
                config.tracked_assets.clone(),
                config.arbitrage_threshold,
                config.arbitrage_tolerance(),
            ),
        );

        Ok(Self {
            config,
            store,
            analyzer,
            feeds,
            rates_path,
            last_analysis: None,
        })
    }

    /// Aggregator with live exchange clients.
    pub fn from_config(config: AggregatorConfig) -> Result<Self> {
        let feeds = venue_feeds(&config)?;
        Self::new(config, feeds)
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn store(&self) -> &RateStore {
        &self.store
    }

    pub fn analyzer(&self) -> &RateAnalyzer {
        &self.analyzer
    }

    pub fn rates_path(&self) -> &Path {
        &self.rates_path
    }

    /// Fetch every venue, append the batch and persist it.
    ///
    /// A failing venue contributes nothing this cycle. `Err` only when every
    /// venue failed.
    pub async fn fetch_cycle(&mut self) -> Result<CycleReport> {
        metrics::counter!(names::FETCH_CYCLES, 1);
        let timeout = self.config.fetch_timeout();

        let fetches = self.feeds.iter().map(|feed| async move {
            let exchange = feed.client.exchange();
            let result =
                match tokio::time::timeout(timeout, feed.client.fetch_current_rates(&feed.instruments))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("timed out after {}s", timeout.as_secs())),
                };
            (exchange, result)
        });
        let results = join_all(fetches).await;

        let timestamp = Utc::now();
        let mut batch = Vec::new();
        let mut failed = Vec::new();
        for (exchange, result) in results {
            match result {
                Ok(rates) => batch.extend(to_samples(timestamp, exchange, rates)),
                Err(e) => {
                    warn!(exchange = %exchange, "⚠️ fetch failed: {:#}", e);
                    metrics::counter!(names::FETCH_FAILURES, 1, "exchange" => exchange.as_str());
                    failed.push(exchange);
                }
            }
        }

        if !self.feeds.is_empty() && failed.len() == self.feeds.len() {
            return Err(anyhow!("every venue failed this cycle"));
        }

        let appended = self.store.append(batch);
        metrics::counter!(names::SAMPLES_APPENDED, appended as u64);
        metrics::gauge!(names::STORE_SAMPLES, self.store.len() as f64);

        let persisted = match self.store.persist(&self.rates_path) {
            Ok(()) => true,
            Err(e) => {
                error!(path = %self.rates_path.display(), "❌ persist failed: {:#}", e);
                metrics::counter!(names::PERSIST_FAILURES, 1);
                false
            }
        };

        if appended > 0 {
            let comparison = self.analyzer.compare(self.store.latest_batch());
            info!("\n{}", comparison);
        }
        info!(
            appended,
            total = self.store.len(),
            failed = failed.len(),
            "✅ fetch cycle complete"
        );

        Ok(CycleReport {
            timestamp,
            appended,
            failed,
            persisted,
        })
    }

    /// Samples inside the configured lookback ending at `now`.
    pub fn window(&self, now: DateTime<Utc>) -> Vec<RateSample> {
        match self.config.summary_lookback() {
            Some(lookback) => self.store.since(now - lookback),
            None => self.store.all().to_vec(),
        }
    }

    pub fn analyze(&self, now: DateTime<Utc>) -> AnalysisResult {
        self.analyzer.analyze(&self.window(now))
    }

    pub fn generate_summary(&self, now: DateTime<Utc>) -> SummaryReport {
        self.analyzer.summarize(&self.window(now), now)
    }

    /// Render the summary for `now` into `<data_dir>/<prefix>_YYYYMMDD_HHMM.txt`.
    pub fn write_summary(&self, prefix: &str, now: DateTime<Utc>) -> Result<PathBuf> {
        let report = self.generate_summary(now);
        let dir = &self.config.data_dir;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let path = dir.join(format!("{}_{}.txt", prefix, now.format(SUMMARY_STAMP_FORMAT)));
        std::fs::write(&path, report.to_string())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("📝 Summary written to {}", path.display());
        Ok(path)
    }

    /// Periodic analysis: log alerts and opportunities, then write a summary.
    pub fn run_analysis(&mut self, now: DateTime<Utc>) -> Result<PathBuf> {
        self.last_analysis = Some(Instant::now());

        let result = self.analyze(now);
        if result.is_empty() {
            info!("No data available for analysis");
        }
        for alert in &result.alerts {
            warn!(
                exchange = %alert.exchange,
                symbol = %alert.symbol,
                "🚨 rate changed {:+.2}% to {:.4}% at {}",
                alert.rate_change * 100.0,
                alert.current_rate,
                alert.timestamp
            );
        }
        for opp in &result.arbitrage_opportunities {
            info!(
                symbol = %opp.symbol,
                "💰 arbitrage spread {:.4}% ({} {:.4}% / {} {:.4}%) at {}",
                opp.spread,
                opp.venue_a,
                opp.rate_a,
                opp.venue_b,
                opp.rate_b,
                opp.timestamp
            );
        }
        metrics::counter!(names::ALERTS, result.alerts.len() as u64);
        metrics::counter!(names::ARBITRAGE, result.arbitrage_opportunities.len() as u64);

        self.write_summary(SUMMARY_PREFIX, now)
    }

    fn analysis_due(&self, now: Instant) -> bool {
        self.last_analysis
            .map_or(true, |last| now.duration_since(last) >= self.config.analysis_interval())
    }

    /// Cycle until `shutdown` resolves, then write the final summary.
    ///
    /// Shutdown is observed while fetching and while sleeping; an in-flight
    /// fetch is abandoned. Returns the final summary path, or `None` when it
    /// could not be written (logged).
    pub async fn run<F>(&mut self, shutdown: F) -> Option<PathBuf>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        // First periodic analysis one interval after start.
        self.last_analysis = Some(Instant::now());

        info!(
            venues = self.feeds.len(),
            interval_secs = self.config.fetch_interval_secs,
            "🚀 Funding rate aggregator started"
        );

        loop {
            let outcome = tokio::select! {
                biased;
                _ = &mut shutdown => None,
                outcome = self.fetch_cycle() => Some(outcome),
            };
            let Some(outcome) = outcome else { break };

            let delay = match outcome {
                Ok(report) => {
                    debug!(timestamp = %report.timestamp, "cycle stored");
                    self.config.fetch_interval()
                }
                Err(e) => {
                    error!("❌ fetch cycle failed: {:#}; retrying", e);
                    self.config.retry_backoff()
                }
            };

            if self.analysis_due(Instant::now()) {
                if let Err(e) = self.run_analysis(Utc::now()) {
                    error!("❌ analysis failed: {:#}", e);
                }
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("🛑 Shutdown requested, generating final summary");
        match self.write_summary(FINAL_SUMMARY_PREFIX, Utc::now()) {
            Ok(path) => Some(path),
            Err(e) => {
                error!("❌ final summary failed: {:#}", e);
                None
            }
        }
    }
}

/// Stamp one venue's rates; non-finite values are dropped.
fn to_samples(
    timestamp: DateTime<Utc>,
    exchange: Exchange,
    rates: BTreeMap<String, f64>,
) -> Vec<RateSample> {
    rates
        .into_iter()
        .filter_map(|(instrument, rate)| {
            let sample = RateSample::new(timestamp, canonical_symbol(&instrument), exchange, rate);
            if sample.is_none() {
                warn!(exchange = %exchange, instrument = %instrument, "dropping non-finite rate");
            }
            sample
        })
        .collect()
}
