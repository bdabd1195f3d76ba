//! Summary Reporter
//!
//! Per-series statistics, trend, annualized yield and volatility class for a
//! window, plus the arbitrage opportunities found in it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use super::arbitrage::{ArbitrageDetector, ArbitrageOpportunity};
use super::stats::{group_series, RateStats};
use super::trend::{classify_trend, Trend};
use crate::models::{RateSample, SeriesKey};

/// 8-hour funding settles three times a day.
pub const FUNDING_PAYMENTS_PER_DAY: f64 = 3.0;
pub const DAYS_PER_YEAR: f64 = 365.0;

const LOW_VOLATILITY_BELOW: f64 = 0.5;
const MEDIUM_VOLATILITY_BELOW: f64 = 1.5;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for VolatilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VolatilityLevel::Low => "Low",
            VolatilityLevel::Medium => "Medium",
            VolatilityLevel::High => "High",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Volatility {
    /// `|std_dev / mean|`, 0 for a zero mean (approximation)
    pub ratio: f64,
    pub level: VolatilityLevel,
}

impl Volatility {
    pub fn classify(mean: f64, std_dev: f64) -> Self {
        let ratio = if mean == 0.0 {
            0.0
        } else {
            (std_dev / mean).abs()
        };
        let level = if ratio < LOW_VOLATILITY_BELOW {
            VolatilityLevel::Low
        } else if ratio < MEDIUM_VOLATILITY_BELOW {
            VolatilityLevel::Medium
        } else {
            VolatilityLevel::High
        };
        Self { ratio, level }
    }
}

/// Mean per-payment rate (percent) expressed as a yearly yield (percent).
pub fn annualized_yield(mean_rate: f64) -> f64 {
    mean_rate * DAYS_PER_YEAR * FUNDING_PAYMENTS_PER_DAY
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub key: SeriesKey,
    pub current: f64,
    pub stats: RateStats,
    pub trend: Option<Trend>,
    pub annualized_yield: f64,
    /// `None` when the std-dev is undefined (single observation)
    pub volatility: Option<Volatility>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    pub generated_at: DateTime<Utc>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub observation_count: usize,
    /// Distinct sample timestamps (one per fetch batch)
    pub fetch_cycles: usize,
    pub series: Vec<SeriesSummary>,
    pub arbitrage: Vec<ArbitrageOpportunity>,
}

impl SummaryReport {
    pub fn build(
        samples: &[RateSample],
        arbitrage: &ArbitrageDetector,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let series = group_series(samples)
            .into_iter()
            .filter_map(|(key, series)| {
                let rates: Vec<f64> = series.iter().map(|s| s.rate).collect();
                let stats = RateStats::from_rates(&rates)?;
                Some(SeriesSummary {
                    key,
                    current: *rates.last()?,
                    trend: classify_trend(&rates),
                    annualized_yield: annualized_yield(stats.mean),
                    volatility: stats.std_dev.map(|sd| Volatility::classify(stats.mean, sd)),
                    stats,
                })
            })
            .collect();

        let timestamps: BTreeSet<DateTime<Utc>> = samples.iter().map(|s| s.timestamp).collect();

        Self {
            generated_at,
            period_start: timestamps.first().copied(),
            period_end: timestamps.last().copied(),
            observation_count: samples.len(),
            fetch_cycles: timestamps.len(),
            series,
            arbitrage: arbitrage.detect(samples),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observation_count == 0
    }
}

impl fmt::Display for SummaryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (Some(start), Some(end)) = (self.period_start, self.period_end) else {
            return f.write_str("No data available for analysis");
        };

        writeln!(f, "=== Funding Rate Summary ===")?;
        writeln!(f, "Generated: {}", self.generated_at.format(TIME_FORMAT))?;
        writeln!(
            f,
            "Period: {} to {}",
            start.format(TIME_FORMAT),
            end.format(TIME_FORMAT)
        )?;
        writeln!(
            f,
            "Number of observations: {} ({} fetch cycles)",
            self.observation_count, self.fetch_cycles
        )?;

        for s in &self.series {
            writeln!(f)?;
            writeln!(f, "{}:", s.key)?;
            writeln!(f, "  Current: {:.4}%", s.current)?;
            writeln!(f, "  Period High: {:.4}%", s.stats.max)?;
            writeln!(f, "  Period Low: {:.4}%", s.stats.min)?;
            writeln!(f, "  Period Average: {:.4}%", s.stats.mean)?;
            match s.stats.std_dev {
                Some(sd) => writeln!(f, "  Period Std Dev: {:.4}%", sd)?,
                None => writeln!(f, "  Period Std Dev: n/a")?,
            }
            match &s.trend {
                Some(t) => match t.change {
                    Some(change) => writeln!(
                        f,
                        "  Trend: {} ({:+.4}%, {:+.2}% relative)",
                        t.direction.arrow(),
                        t.delta(),
                        change * 100.0
                    )?,
                    None => writeln!(
                        f,
                        "  Trend: {} ({:+.4}%, relative change undefined)",
                        t.direction.arrow(),
                        t.delta()
                    )?,
                },
                None => writeln!(f, "  Trend: n/a")?,
            }
            writeln!(f, "  Annualized Yield: {:.2}%", s.annualized_yield)?;
            match s.volatility {
                Some(v) => writeln!(f, "  Rate Volatility: {} ({:.2})", v.level, v.ratio)?,
                None => writeln!(f, "  Rate Volatility: n/a")?,
            }
        }

        writeln!(f)?;
        writeln!(f, "=== Arbitrage Opportunities ===")?;
        if self.arbitrage.is_empty() {
            write!(f, "None detected")?;
        }
        for (i, opp) in self.arbitrage.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "{} {}: spread {:.4}% ({} {:.4}% / {} {:.4}%)",
                opp.timestamp.format(TIME_FORMAT),
                opp.symbol,
                opp.spread,
                opp.venue_a.display_name(),
                opp.rate_a,
                opp.venue_b.display_name(),
                opp.rate_b
            )?;
        }
        Ok(())
    }
}
