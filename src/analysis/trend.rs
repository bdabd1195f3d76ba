//! Trend Classifier
//!
//! Compares the first and last rate of a series. Equal endpoints are `Flat`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::stats::{group_series, pct_change};
use crate::models::{RateSample, SeriesKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Upward,
    Downward,
    Flat,
}

impl TrendDirection {
    pub fn arrow(&self) -> &'static str {
        match self {
            TrendDirection::Upward => "↑",
            TrendDirection::Downward => "↓",
            TrendDirection::Flat => "→",
        }
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrendDirection::Upward => "upward",
            TrendDirection::Downward => "downward",
            TrendDirection::Flat => "flat",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub direction: TrendDirection,
    pub first_rate: f64,
    pub last_rate: f64,
    /// `(last - first) / first`; `None` when the first rate is zero
    pub change: Option<f64>,
}

impl Trend {
    /// Absolute move in percentage points
    pub fn delta(&self) -> f64 {
        self.last_rate - self.first_rate
    }
}

/// Classify a timestamp-ordered series of rates; needs at least two.
pub fn classify_trend(rates: &[f64]) -> Option<Trend> {
    if rates.len() < 2 {
        return None;
    }
    let first = rates[0];
    let last = rates[rates.len() - 1];

    let direction = if last > first {
        TrendDirection::Upward
    } else if last < first {
        TrendDirection::Downward
    } else {
        TrendDirection::Flat
    };

    Some(Trend {
        direction,
        first_rate: first,
        last_rate: last,
        change: pct_change(first, last),
    })
}

/// Trend of every series with at least two samples.
pub fn series_trends(samples: &[RateSample]) -> BTreeMap<SeriesKey, Trend> {
    group_series(samples)
        .into_iter()
        .filter_map(|(key, series)| {
            let rates: Vec<f64> = series.iter().map(|s| s.rate).collect();
            classify_trend(&rates).map(|t| (key, t))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Exchange;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_upward_trend() {
        let trend = classify_trend(&[1.0, 1.2, 1.5]).unwrap();
        assert_eq!(trend.direction, TrendDirection::Upward);
        assert!((trend.change.unwrap() - 0.5).abs() < 1e-12);
        assert!((trend.delta() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_first_rate_has_undefined_change() {
        let trend = classify_trend(&[0.0, 1.0]).unwrap();
        assert_eq!(trend.direction, TrendDirection::Upward);
        assert_eq!(trend.change, None);
    }

    #[test]
    fn test_downward_and_flat() {
        assert_eq!(
            classify_trend(&[0.02, 0.01]).unwrap().direction,
            TrendDirection::Downward
        );
        let flat = classify_trend(&[0.02, 0.05, 0.02]).unwrap();
        assert_eq!(flat.direction, TrendDirection::Flat);
        assert_eq!(flat.change, Some(0.0));
        assert_eq!(flat.direction.arrow(), "→");
    }

    #[test]
    fn test_needs_two_samples() {
        assert!(classify_trend(&[]).is_none());
        assert!(classify_trend(&[1.0]).is_none());
    }

    #[test]
    fn test_series_trends_use_time_order() {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let samples = vec![
            RateSample::new(base + Duration::hours(2), "BTC", Exchange::Binance, 0.03).unwrap(),
            RateSample::new(base, "BTC", Exchange::Binance, 0.01).unwrap(),
            RateSample::new(base, "ETH", Exchange::Binance, 0.01).unwrap(),
        ];
        let trends = series_trends(&samples);
        assert_eq!(trends.len(), 1);
        let btc = trends.values().next().unwrap();
        assert_eq!(btc.direction, TrendDirection::Upward);
        assert_eq!(btc.first_rate, 0.01);
    }
}
