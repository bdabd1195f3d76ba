//! Aggregator Configuration
//!
//! Defaults, overlaid by an optional TOML file, overlaid by environment
//! variables (a `.env` file is loaded by the binary before this runs).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::alerts::DEFAULT_ALERT_THRESHOLD;
use crate::analysis::arbitrage::DEFAULT_SPREAD_THRESHOLD;
use crate::exchanges::binance::BINANCE_FUTURES_BASE;
use crate::exchanges::deribit::DERIBIT_API_BASE;
use crate::models::Exchange;

pub const CONFIG_PATH_ENV: &str = "FUNDING_CONFIG_PATH";

/// One venue's connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VenueConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Exchange-native instrument names
    pub instruments: Vec<String>,
    /// Sent as `X-MBX-APIKEY` on Binance. Unused on Deribit, whose funding
    /// endpoints are public.
    pub api_key: Option<String>,
    /// Reserved for signed endpoints; funding data needs no signature.
    pub api_secret: Option<String>,
}

impl VenueConfig {
    pub fn binance() -> Self {
        Self {
            enabled: true,
            base_url: BINANCE_FUTURES_BASE.into(),
            instruments: vec!["BTCUSDT".into(), "ETHUSDT".into()],
            api_key: None,
            api_secret: None,
        }
    }

    pub fn deribit() -> Self {
        Self {
            enabled: true,
            base_url: DERIBIT_API_BASE.into(),
            instruments: vec!["BTC-PERPETUAL".into(), "ETH-PERPETUAL".into()],
            api_key: None,
            api_secret: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.instruments.is_empty()
    }

    /// Key and secret both set
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: String::new(),
            instruments: Vec::new(),
            api_key: None,
            api_secret: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub data_dir: PathBuf,
    pub rates_file: String,

    pub binance: VenueConfig,
    pub deribit: VenueConfig,

    /// Canonical assets compared across venues
    pub tracked_assets: Vec<String>,

    pub fetch_interval_secs: u64,
    pub analysis_interval_secs: u64,
    /// Fixed delay after a failed cycle
    pub retry_backoff_secs: u64,
    /// Upper bound on one venue's fetch
    pub fetch_timeout_secs: u64,

    /// Fractional change that raises an alert (0.01 = 1%)
    pub alert_threshold: f64,
    /// Cross-venue spread in percentage points
    pub arbitrage_threshold: f64,
    /// Max distance between peer samples; 0 = exact timestamp match
    pub arbitrage_tolerance_secs: u64,

    /// Window for periodic summaries; all stored data when unset
    pub summary_lookback_hours: Option<u64>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            rates_file: "funding_rates.csv".into(),
            binance: VenueConfig::binance(),
            deribit: VenueConfig::deribit(),
            tracked_assets: vec!["BTC".into(), "ETH".into()],
            fetch_interval_secs: 60,
            analysis_interval_secs: 86_400,
            retry_backoff_secs: 10,
            fetch_timeout_secs: 15,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            arbitrage_threshold: DEFAULT_SPREAD_THRESHOLD,
            arbitrage_tolerance_secs: 30,
            summary_lookback_hours: None,
        }
    }
}

impl AggregatorConfig {
    /// Defaults, then `path` (or `FUNDING_CONFIG_PATH`), then env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

        let mut cfg = match path {
            Some(p) => Self::from_toml_file(&p)?,
            None => Self::default(),
        };
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Overlay environment variables. Unparsable numeric values are errors.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = env::var("FUNDING_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }

        for (venue, prefix) in [(&mut self.binance, "BINANCE"), (&mut self.deribit, "DERIBIT")] {
            if let Some(v) = non_empty_var(&format!("{prefix}_API_KEY")) {
                venue.api_key = Some(v);
            }
            if let Some(v) = non_empty_var(&format!("{prefix}_API_SECRET")) {
                venue.api_secret = Some(v);
            }
            if let Some(v) = non_empty_var(&format!("{prefix}_PAIRS")) {
                venue.instruments = split_list(&v);
            }
            if let Ok(v) = env::var(format!("{prefix}_ENABLED")) {
                venue.enabled = matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON");
            }
        }

        if let Some(v) = non_empty_var("FUNDING_TRACKED_ASSETS") {
            self.tracked_assets = split_list(&v);
        }

        env_parse("FUNDING_FETCH_INTERVAL_SECS", &mut self.fetch_interval_secs)?;
        env_parse("FUNDING_ANALYSIS_INTERVAL_SECS", &mut self.analysis_interval_secs)?;
        env_parse("FUNDING_RETRY_BACKOFF_SECS", &mut self.retry_backoff_secs)?;
        env_parse("FUNDING_FETCH_TIMEOUT_SECS", &mut self.fetch_timeout_secs)?;
        env_parse("FUNDING_ALERT_THRESHOLD", &mut self.alert_threshold)?;
        env_parse("FUNDING_ARBITRAGE_THRESHOLD", &mut self.arbitrage_threshold)?;
        env_parse("FUNDING_ARBITRAGE_TOLERANCE_SECS", &mut self.arbitrage_tolerance_secs)?;

        if let Some(v) = non_empty_var("FUNDING_SUMMARY_LOOKBACK_HOURS") {
            let hours = v
                .parse()
                .with_context(|| format!("FUNDING_SUMMARY_LOOKBACK_HOURS={v}"))?;
            self.summary_lookback_hours = Some(hours);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("alert_threshold", self.alert_threshold),
            ("arbitrage_threshold", self.arbitrage_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{name} must be a finite non-negative number, got {value}");
            }
        }
        for (name, value) in [
            ("fetch_interval_secs", self.fetch_interval_secs),
            ("analysis_interval_secs", self.analysis_interval_secs),
            ("retry_backoff_secs", self.retry_backoff_secs),
            ("fetch_timeout_secs", self.fetch_timeout_secs),
        ] {
            if value == 0 {
                bail!("{name} must be greater than zero");
            }
        }
        if self.summary_lookback_hours == Some(0) {
            bail!("summary_lookback_hours must be greater than zero when set");
        }
        if !self.binance.is_active() && !self.deribit.is_active() {
            bail!("at least one venue must be enabled with at least one instrument");
        }
        if self.rates_file.trim().is_empty() {
            bail!("rates_file must not be empty");
        }
        Ok(())
    }

    pub fn venue(&self, exchange: Exchange) -> &VenueConfig {
        match exchange {
            Exchange::Binance => &self.binance,
            Exchange::Deribit => &self.deribit,
        }
    }

    pub fn rates_path(&self) -> PathBuf {
        self.data_dir.join(&self.rates_file)
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_secs)
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_secs(self.analysis_interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn arbitrage_tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.arbitrage_tolerance_secs.min(u32::MAX as u64) as i64)
    }

    pub fn summary_lookback(&self) -> Option<chrono::Duration> {
        self.summary_lookback_hours
            .map(|h| chrono::Duration::hours(h.min(i32::MAX as u64) as i64))
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str, slot: &mut T) -> Result<()>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(v) = non_empty_var(key) {
        *slot = v.parse().with_context(|| format!("{key}={v}"))?;
    }
    Ok(())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AggregatorConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.rates_path(), PathBuf::from("data/funding_rates.csv"));
        assert_eq!(cfg.fetch_interval(), Duration::from_secs(60));
        assert_eq!(cfg.arbitrage_tolerance(), chrono::Duration::seconds(30));
        assert_eq!(cfg.summary_lookback(), None);
        assert_eq!(cfg.venue(Exchange::Deribit).instruments[0], "BTC-PERPETUAL");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = AggregatorConfig::from_toml_str(
            r#"
            fetch_interval_secs = 5
            alert_threshold = 0.05
            summary_lookback_hours = 24

            [deribit]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(cfg.fetch_interval_secs, 5);
        assert_eq!(cfg.alert_threshold, 0.05);
        assert_eq!(cfg.summary_lookback(), Some(chrono::Duration::hours(24)));
        assert!(!cfg.deribit.enabled);
        assert_eq!(cfg.binance, VenueConfig::binance());
        assert_eq!(cfg.analysis_interval_secs, 86_400);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aggregator.toml");
        std::fs::write(
            &path,
            "rates_file = \"rates.csv\"\ntracked_assets = [\"BTC\"]\n",
        )
        .unwrap();

        let cfg = AggregatorConfig::from_toml_file(&path).unwrap();
        assert_eq!(cfg.rates_file, "rates.csv");
        assert_eq!(cfg.tracked_assets, ["BTC"]);

        assert!(AggregatorConfig::from_toml_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut cfg = AggregatorConfig::default();
        cfg.alert_threshold = f64::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = AggregatorConfig::default();
        cfg.arbitrage_threshold = -0.1;
        assert!(cfg.validate().is_err());

        let mut cfg = AggregatorConfig::default();
        cfg.fetch_interval_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AggregatorConfig::default();
        cfg.binance.enabled = false;
        cfg.deribit.instruments.clear();
        assert!(cfg.validate().is_err());

        assert!(AggregatorConfig::from_toml_str("fetch_interval_secs = \"soon\"").is_err());
    }

    #[test]
    fn test_credentials_need_key_and_secret() {
        let mut venue = VenueConfig::binance();
        assert!(!venue.has_credentials());
        venue.api_key = Some("key".into());
        assert!(!venue.has_credentials());
        venue.api_secret = Some("secret".into());
        assert!(venue.has_credentials());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" BTCUSDT, ETHUSDT ,,"), ["BTCUSDT", "ETHUSDT"]);
        assert!(split_list("").is_empty());
    }
}
