//! Binance USDⓈ-M Futures REST client
//!
//! Current rates come from `premiumIndex.lastFundingRate`, history from
//! `fundingRate`. Both endpoints are public; an API key is only attached as
//! `X-MBX-APIKEY` when configured.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{canonical_symbol, fraction_to_percent, ExchangeClient};
use crate::models::{Exchange, RateSample};

pub const BINANCE_FUTURES_BASE: &str = "https://fapi.binance.com";

/// Maximum rows per `fundingRate` request
const HISTORY_PAGE_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
struct FundingRateRecord {
    #[serde(rename = "fundingTime")]
    funding_time: Option<i64>,
    #[serde(rename = "fundingRate")]
    funding_rate: Option<Value>,
}

#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new(base_url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            headers.insert(
                "X-MBX-APIKEY",
                key.trim().parse().context("Invalid Binance api key")?,
            );
        }

        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers(headers)
            .build()
            .context("Failed to build BinanceClient")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let resp = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("GET {} {}: {}", path, status, text));
        }

        resp.json::<Value>()
            .await
            .with_context(|| format!("Failed to parse {path} response"))
    }

    async fn fetch_premium_index(&self, symbol: &str) -> Result<f64> {
        let body = self
            .get_json("/fapi/v1/premiumIndex", &[("symbol", symbol.to_string())])
            .await?;
        parse_premium_index(&body)
            .ok_or_else(|| anyhow!("premiumIndex for {symbol} has no usable lastFundingRate"))
    }
}

#[async_trait::async_trait]
impl ExchangeClient for BinanceClient {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    async fn fetch_current_rates(&self, instruments: &[String]) -> Result<BTreeMap<String, f64>> {
        let mut rates = BTreeMap::new();
        let mut last_error = None;

        for symbol in instruments {
            match self.fetch_premium_index(symbol).await {
                Ok(rate) => {
                    debug!(instrument = %symbol, rate, "binance funding rate");
                    rates.insert(symbol.clone(), rate);
                }
                Err(e) => {
                    warn!(instrument = %symbol, error = %e, "dropping binance instrument this cycle");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if rates.is_empty() => Err(e.context("Error fetching Binance funding rates")),
            _ => Ok(rates),
        }
    }

    async fn fetch_historical_rates(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RateSample>> {
        let mut samples: Vec<RateSample> = Vec::new();
        let mut cursor = start.timestamp_millis();
        let end_ms = end.timestamp_millis();

        while cursor <= end_ms {
            let body = self
                .get_json(
                    "/fapi/v1/fundingRate",
                    &[
                        ("symbol", instrument.to_string()),
                        ("startTime", cursor.to_string()),
                        ("endTime", end_ms.to_string()),
                        ("limit", HISTORY_PAGE_LIMIT.to_string()),
                    ],
                )
                .await?;

            let page = parse_funding_history(instrument, &body)?;
            let count = page.len();
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.timestamp.timestamp_millis() + 1;
            samples.extend(page);

            if count < HISTORY_PAGE_LIMIT as usize {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        Ok(samples)
    }
}

/// `lastFundingRate` of a premiumIndex payload, in percent.
fn parse_premium_index(body: &Value) -> Option<f64> {
    body.get("lastFundingRate").and_then(fraction_to_percent)
}

/// Rows of a `fundingRate` payload as samples; malformed rows are dropped.
fn parse_funding_history(instrument: &str, body: &Value) -> Result<Vec<RateSample>> {
    let records: Vec<FundingRateRecord> =
        serde_json::from_value(body.clone()).context("Unexpected fundingRate payload")?;
    let symbol = canonical_symbol(instrument);

    let mut samples: Vec<RateSample> = records
        .into_iter()
        .filter_map(|r| {
            let ts = Utc.timestamp_millis_opt(r.funding_time?).single()?;
            let rate = fraction_to_percent(r.funding_rate.as_ref()?)?;
            RateSample::new(ts, symbol.clone(), Exchange::Binance, rate)
        })
        .collect();
    samples.sort_by_key(|s| s.timestamp);
    Ok(samples)
}
