//! Statistics Engine
//!
//! Per-symbol aggregates (mean, sample std-dev, min, max) and the
//! period-over-period change of every sample against its predecessor in the
//! same `(symbol, exchange)` series.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::models::{Exchange, RateSample, SeriesKey};

/// Aggregate statistics for a group of rates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateStats {
    pub count: usize,
    pub mean: f64,
    /// Bessel-corrected; `None` with fewer than two samples
    pub std_dev: Option<f64>,
    pub min: f64,
    pub max: f64,
}

impl RateStats {
    /// `None` for an empty slice.
    pub fn from_rates(rates: &[f64]) -> Option<Self> {
        if rates.is_empty() {
            return None;
        }
        let min = rates.iter().copied().fold(f64::INFINITY, f64::min);
        let max = rates.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            count: rates.len(),
            mean: mean(rates)?,
            std_dev: sample_std_dev(rates),
            min,
            max,
        })
    }
}

/// Change of one sample relative to the previous sample of its series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateChange {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub exchange: Exchange,
    pub rate: f64,
    /// Fractional change; `None` for the first sample or a zero predecessor
    pub change: Option<f64>,
}

/// Output of [`compute_statistics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub by_symbol: BTreeMap<String, RateStats>,
    pub changes: Vec<RateChange>,
}

impl Statistics {
    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}

pub fn compute_statistics(samples: &[RateSample]) -> Statistics {
    let mut by_symbol: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for sample in samples {
        by_symbol
            .entry(sample.symbol.clone())
            .or_default()
            .push(sample.rate);
    }

    Statistics {
        by_symbol: by_symbol
            .into_iter()
            .filter_map(|(symbol, rates)| RateStats::from_rates(&rates).map(|s| (symbol, s)))
            .collect(),
        changes: rate_changes(samples),
    }
}

/// Fractional change per sample, in timestamp order (ties keep arrival order).
pub fn rate_changes(samples: &[RateSample]) -> Vec<RateChange> {
    let mut previous: HashMap<SeriesKey, f64> = HashMap::new();

    time_ordered(samples)
        .into_iter()
        .map(|sample| {
            let change = previous
                .insert(sample.series_key(), sample.rate)
                .and_then(|prev| pct_change(prev, sample.rate));
            RateChange {
                timestamp: sample.timestamp,
                symbol: sample.symbol.clone(),
                exchange: sample.exchange,
                rate: sample.rate,
                change,
            }
        })
        .collect()
}

/// Samples grouped into per-series sequences ordered by timestamp.
pub fn group_series(samples: &[RateSample]) -> BTreeMap<SeriesKey, Vec<&RateSample>> {
    let mut series: BTreeMap<SeriesKey, Vec<&RateSample>> = BTreeMap::new();
    for sample in time_ordered(samples) {
        series.entry(sample.series_key()).or_default().push(sample);
    }
    series
}

fn time_ordered(samples: &[RateSample]) -> Vec<&RateSample> {
    let mut ordered: Vec<&RateSample> = samples.iter().collect();
    // Stable: equal timestamps stay in arrival order.
    ordered.sort_by_key(|s| s.timestamp);
    ordered
}

/// `(current - previous) / previous`, undefined for a zero predecessor.
pub fn pct_change(previous: f64, current: f64) -> Option<f64> {
    if previous == 0.0 {
        return None;
    }
    let change = (current - previous) / previous;
    change.is_finite().then_some(change)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation: `sqrt(Σ(x - mean)² / (n - 1))`.
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}
