//! Alert Detector
//!
//! Stateless: every sample whose fractional change exceeds the threshold
//! produces an alert, so a sustained move alerts on each qualifying sample.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::stats::RateChange;
use crate::models::Exchange;

/// Default alert threshold (1% fractional change)
pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub exchange: Exchange,
    pub rate_change: f64,
    pub current_rate: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct AlertDetector {
    threshold: f64,
}

impl Default for AlertDetector {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_THRESHOLD)
    }
}

impl AlertDetector {
    /// The threshold is a magnitude; its sign is ignored.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.abs(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn detect(&self, changes: &[RateChange]) -> Vec<Alert> {
        changes
            .iter()
            .filter_map(|c| {
                let change = c.change?;
                (change.abs() > self.threshold).then(|| Alert {
                    timestamp: c.timestamp,
                    symbol: c.symbol.clone(),
                    exchange: c.exchange,
                    rate_change: change,
                    current_rate: c.rate,
                })
            })
            .collect()
    }
}
