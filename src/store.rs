//! Rate Store
//!
//! Append-only, time-ordered collection of rate samples backed by a CSV file.
//! The file is rewritten in full on every persist (write to `<file>.tmp`, then
//! rename) so a failed write never leaves a truncated store behind.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::exchanges::canonical_symbol;
use crate::models::{Exchange, RateSample};

const NORMALIZED_HEADER: [&str; 4] = ["timestamp", "symbol", "exchange", "rate"];

/// Naive layouts written by older dataframe-based tooling (assumed UTC)
const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Serialize, Deserialize)]
struct RateRow {
    timestamp: DateTime<Utc>,
    symbol: String,
    exchange: Exchange,
    rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateStore {
    samples: Vec<RateSample>,
}

impl RateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch, preserving the batch order. Returns how many samples were added.
    pub fn append<I>(&mut self, samples: I) -> usize
    where
        I: IntoIterator<Item = RateSample>,
    {
        let before = self.samples.len();
        self.samples.extend(samples);
        self.samples.len() - before
    }

    /// Every sample in arrival order
    pub fn all(&self) -> &[RateSample] {
        &self.samples
    }

    /// Samples strictly newer than `cutoff`
    pub fn since(&self, cutoff: DateTime<Utc>) -> Vec<RateSample> {
        self.samples
            .iter()
            .filter(|s| s.timestamp > cutoff)
            .cloned()
            .collect()
    }

    /// Samples sharing the most recent timestamp (the last fetch batch)
    pub fn latest_batch(&self) -> &[RateSample] {
        let Some(last) = self.samples.last() else {
            return &[];
        };
        let start = self
            .samples
            .iter()
            .rposition(|s| s.timestamp != last.timestamp)
            .map(|i| i + 1)
            .unwrap_or(0);
        &self.samples[start..]
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Load a persisted store. A missing file is an empty store.
    ///
    /// Accepts both the normalized `timestamp,symbol,exchange,rate` layout and
    /// the wide layout (`timestamp` plus one `<exchange>_<instrument>` column
    /// per series). Rows that cannot be parsed are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no persisted rate store yet");
            return Ok(Self::new());
        }

        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open rate store {}", path.display()))?;
        let headers = reader
            .headers()
            .context("Failed to read rate store header")?
            .clone();

        let is_normalized = headers.len() == NORMALIZED_HEADER.len()
            && headers.iter().zip(NORMALIZED_HEADER).all(|(h, e)| h == e);

        let samples = if is_normalized {
            load_normalized(&mut reader)
        } else if headers.get(0) == Some("timestamp") {
            load_wide(&mut reader, &headers)
        } else {
            return Err(anyhow!(
                "{} is not a rate store (missing timestamp column)",
                path.display()
            ));
        };

        Ok(Self { samples })
    }

    /// Write the full store to `path` atomically.
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp = tmp_path(path);
        let mut writer = csv::Writer::from_path(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        for sample in &self.samples {
            writer
                .serialize(RateRow {
                    timestamp: sample.timestamp,
                    symbol: sample.symbol.clone(),
                    exchange: sample.exchange,
                    rate: sample.rate,
                })
                .context("Failed to write rate row")?;
        }
        // An empty store still gets a header so reload recognizes the layout.
        if self.samples.is_empty() {
            writer.write_record(NORMALIZED_HEADER)?;
        }
        let file = writer
            .into_inner()
            .map_err(|e| anyhow!("Failed to flush rate store: {}", e.error()))?;
        file.sync_all().context("Failed to sync rate store")?;
        drop(file);

        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move {} into place", tmp.display()))?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn load_normalized(reader: &mut csv::Reader<fs::File>) -> Vec<RateSample> {
    let mut samples = Vec::new();
    for (line, row) in reader.deserialize::<RateRow>().enumerate() {
        match row {
            Ok(row) => match RateSample::new(row.timestamp, row.symbol, row.exchange, row.rate) {
                Some(sample) => samples.push(sample),
                None => warn!(line = line + 2, "skipping non-finite rate"),
            },
            Err(e) => warn!(line = line + 2, error = %e, "skipping malformed rate row"),
        }
    }
    samples
}

fn load_wide(reader: &mut csv::Reader<fs::File>, headers: &csv::StringRecord) -> Vec<RateSample> {
    // Column index -> (exchange, canonical symbol); unknown columns are ignored.
    let columns: Vec<(usize, Exchange, String)> = headers
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(idx, name)| {
            let (exchange, instrument) = name.split_once('_')?;
            match exchange.parse::<Exchange>() {
                Ok(ex) => Some((idx, ex, canonical_symbol(instrument))),
                Err(_) => {
                    warn!(column = name, "ignoring column with unknown exchange prefix");
                    None
                }
            }
        })
        .collect();

    let mut samples = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!(line = line + 2, error = %e, "skipping malformed rate row");
                continue;
            }
        };
        let Some(timestamp) = record.get(0).and_then(parse_timestamp) else {
            warn!(line = line + 2, "skipping row with unparseable timestamp");
            continue;
        };
        for (idx, exchange, symbol) in &columns {
            let Some(cell) = record.get(*idx).map(str::trim).filter(|c| !c.is_empty()) else {
                continue;
            };
            match cell.parse::<f64>().ok().and_then(|rate| {
                RateSample::new(timestamp, symbol.clone(), *exchange, rate)
            }) {
                Some(sample) => samples.push(sample),
                None => warn!(line = line + 2, value = cell, "skipping malformed rate cell"),
            }
        }
    }
    samples
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
