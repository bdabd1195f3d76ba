//! Rate analysis: statistics, alerts, cross-venue arbitrage, trends and reports.
//!
//! Every component is a pure function of the samples it is handed; none of
//! them assume a particular retention window.

pub mod alerts;
pub mod arbitrage;
pub mod comparison;
pub mod stats;
pub mod summary;
pub mod trend;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::RateSample;

pub use alerts::{Alert, AlertDetector};
pub use arbitrage::{ArbitrageDetector, ArbitrageOpportunity};
pub use comparison::ExchangeComparison;
pub use stats::{compute_statistics, RateChange, RateStats, Statistics};
pub use summary::{SummaryReport, Volatility, VolatilityLevel};
pub use trend::{classify_trend, series_trends, Trend, TrendDirection};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub statistics: Statistics,
    pub alerts: Vec<Alert>,
    pub arbitrage_opportunities: Vec<ArbitrageOpportunity>,
}

impl AnalysisResult {
    /// Nothing to analyze (no samples in the window)
    pub fn is_empty(&self) -> bool {
        self.statistics.is_empty()
    }
}

/// Runs the individual detectors over one sample window.
#[derive(Debug, Clone)]
pub struct RateAnalyzer {
    alerts: AlertDetector,
    arbitrage: ArbitrageDetector,
}

impl RateAnalyzer {
    pub fn new(alerts: AlertDetector, arbitrage: ArbitrageDetector) -> Self {
        Self { alerts, arbitrage }
    }

    pub fn arbitrage(&self) -> &ArbitrageDetector {
        &self.arbitrage
    }

    pub fn analyze(&self, samples: &[RateSample]) -> AnalysisResult {
        if samples.is_empty() {
            return AnalysisResult::default();
        }
        let statistics = compute_statistics(samples);
        let alerts = self.alerts.detect(&statistics.changes);
        AnalysisResult {
            arbitrage_opportunities: self.arbitrage.detect(samples),
            alerts,
            statistics,
        }
    }

    pub fn summarize(&self, samples: &[RateSample], generated_at: DateTime<Utc>) -> SummaryReport {
        SummaryReport::build(samples, &self.arbitrage, generated_at)
    }

    /// Current-rate comparison across the two venues.
    pub fn compare(&self, samples: &[RateSample]) -> ExchangeComparison {
        ExchangeComparison::from_samples(
            samples,
            self.arbitrage.assets(),
            self.arbitrage.venues(),
            self.arbitrage.threshold(),
        )
    }
}
