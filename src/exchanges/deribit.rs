//! Deribit public REST client
//!
//! Uses `public/ticker` (`funding_8h`) for the current rate,
//! `public/get_funding_rate_history` for history and
//! `public/get_funding_chart_data` for the short chart windows.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use super::{canonical_symbol, fraction_to_percent, ExchangeClient};
use crate::models::{Exchange, RateSample};

pub const DERIBIT_API_BASE: &str = "https://www.deribit.com/api/v2";

const INTEREST_8H: &str = "interest_8h";
const INTEREST_1H: &str = "interest_1h";

/// Chart windows supported by `get_funding_chart_data`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartLength {
    EightHours,
    OneDay,
    OneMonth,
}

impl ChartLength {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartLength::EightHours => "8h",
            ChartLength::OneDay => "24h",
            ChartLength::OneMonth => "1m",
        }
    }
}

impl fmt::Display for ChartLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartLength {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "8h" => Ok(ChartLength::EightHours),
            "24h" => Ok(ChartLength::OneDay),
            "1m" => Ok(ChartLength::OneMonth),
            other => Err(anyhow!("chart length must be 8h, 24h or 1m (got {other})")),
        }
    }
}

#[derive(Clone)]
pub struct DeribitClient {
    client: Client,
    base_url: String,
}

impl DeribitClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to build DeribitClient")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[inline]
    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    /// Call a public method and return its `result` member.
    async fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value> {
        let resp = self
            .client
            .get(self.url(method))
            .query(params)
            .send()
            .await
            .with_context(|| format!("GET {method} failed"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("GET {} {}: {}", method, status, text));
        }

        let mut body = resp
            .json::<Value>()
            .await
            .with_context(|| format!("Failed to parse {method} response"))?;
        let result = body.get_mut("result").map(Value::take);
        match result {
            Some(result) if !result.is_null() => Ok(result),
            _ => Err(anyhow!("{method} returned no result: {body}")),
        }
    }

    /// Funding chart for the given window, one sample per chart point.
    pub async fn fetch_funding_chart(
        &self,
        instrument: &str,
        length: ChartLength,
    ) -> Result<Vec<RateSample>> {
        let result = self
            .call(
                "public/get_funding_chart_data",
                &[
                    ("instrument_name", instrument.to_string()),
                    ("length", length.to_string()),
                ],
            )
            .await?;
        let points = result.get("data").cloned().unwrap_or(Value::Array(vec![]));
        Ok(parse_interest_points(instrument, &points, INTEREST_8H))
    }

    /// Hourly funding history (`interest_1h`) between `start` and `end`.
    pub async fn fetch_hourly_history(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RateSample>> {
        let result = self.funding_history(instrument, start, end).await?;
        Ok(parse_interest_points(instrument, &result, INTEREST_1H))
    }

    /// Funding accrued over `start..end`, in percent.
    pub async fn fetch_funding_rate_value(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64> {
        let result = self
            .call(
                "public/get_funding_rate_value",
                &window_params(instrument, start, end),
            )
            .await?;
        fraction_to_percent(&result)
            .ok_or_else(|| anyhow!("get_funding_rate_value for {instrument} is not a number: {result}"))
    }

    async fn funding_history(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Value> {
        self.call(
            "public/get_funding_rate_history",
            &window_params(instrument, start, end),
        )
        .await
    }
}

fn window_params(
    instrument: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> [(&'static str, String); 3] {
    [
        ("instrument_name", instrument.to_string()),
        ("start_timestamp", start.timestamp_millis().to_string()),
        ("end_timestamp", end.timestamp_millis().to_string()),
    ]
}

#[async_trait::async_trait]
impl ExchangeClient for DeribitClient {
    fn exchange(&self) -> Exchange {
        Exchange::Deribit
    }

    async fn fetch_current_rates(&self, instruments: &[String]) -> Result<BTreeMap<String, f64>> {
        let mut rates = BTreeMap::new();
        let mut last_error = None;

        for instrument in instruments {
            let outcome = self
                .call("public/ticker", &[("instrument_name", instrument.clone())])
                .await
                .and_then(|ticker| {
                    debug!(
                        instrument = %instrument,
                        current_funding = ?ticker.get("current_funding"),
                        funding_8h = ?ticker.get("funding_8h"),
                        "deribit ticker"
                    );
                    parse_ticker(&ticker)
                        .ok_or_else(|| anyhow!("ticker for {instrument} has no usable funding_8h"))
                });

            match outcome {
                Ok(rate) => {
                    rates.insert(instrument.clone(), rate);
                }
                Err(e) => {
                    warn!(instrument = %instrument, error = %e, "dropping deribit instrument this cycle");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if rates.is_empty() => Err(e.context("Error fetching Deribit funding rates")),
            _ => Ok(rates),
        }
    }

    async fn fetch_historical_rates(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RateSample>> {
        let result = self.funding_history(instrument, start, end).await?;
        Ok(parse_interest_points(instrument, &result, INTEREST_8H))
    }
}

/// `funding_8h` of a ticker result, in percent.
fn parse_ticker(ticker: &Value) -> Option<f64> {
    ticker.get("funding_8h").and_then(fraction_to_percent)
}

/// `[{timestamp, interest_8h, interest_1h, ..}]` points (history and chart
/// share the shape). `column` picks the interest field.
fn parse_interest_points(instrument: &str, points: &Value, column: &str) -> Vec<RateSample> {
    let symbol = canonical_symbol(instrument);
    let Some(points) = points.as_array() else {
        warn!(instrument, "funding points payload is not an array");
        return Vec::new();
    };

    let mut samples: Vec<RateSample> = points
        .iter()
        .filter_map(|p| {
            let ts = Utc
                .timestamp_millis_opt(p.get("timestamp")?.as_i64()?)
                .single()?;
            let rate = fraction_to_percent(p.get(column)?)?;
            RateSample::new(ts, symbol.clone(), Exchange::Deribit, rate)
        })
        .collect();
    samples.sort_by_key(|s| s.timestamp);
    samples
}
