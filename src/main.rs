//! Funding Rate Aggregator
//!
//! Usage:
//!   funding-aggregator [--config aggregator.toml] [--metrics-port 9100] run
//!   funding-aggregator summary --write
//!   funding-aggregator history --exchange deribit --instrument BTC-PERPETUAL --chart 24h
//!   funding-aggregator history --exchange deribit --instrument BTC-PERPETUAL --hourly
//!
//! Environment Variables:
//!   FUNDING_CONFIG_PATH - Path to TOML config file
//!   BINANCE_API_KEY / BINANCE_API_SECRET, DERIBIT_API_KEY / DERIBIT_API_SECRET
//!   BINANCE_PAIRS / DERIBIT_PAIRS - Comma-separated instrument lists

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use tracing::info;

use funding_aggregator::config::{AggregatorConfig, CONFIG_PATH_ENV};
use funding_aggregator::exchanges::{
    BinanceClient, ChartLength, DeribitClient, ExchangeClient,
};
use funding_aggregator::scheduler::{Aggregator, SUMMARY_PREFIX};
use funding_aggregator::telemetry;
use funding_aggregator::Exchange;

#[derive(Parser, Debug)]
#[command(name = "funding-aggregator")]
#[command(about = "Funding rate aggregation and cross-exchange analysis")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Default log directive when RUST_LOG is unset
    #[arg(short, long, default_value = telemetry::DEFAULT_LOG_DIRECTIVE)]
    log_level: String,

    /// Serve Prometheus metrics on this port
    #[arg(long)]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll venues until interrupted (default)
    Run,
    /// Summarize the persisted store
    Summary {
        /// Also write the summary file into the data directory
        #[arg(long)]
        write: bool,
    },
    /// Print historical funding rates for one instrument
    History {
        #[arg(long)]
        exchange: Exchange,
        #[arg(long)]
        instrument: String,
        #[arg(long, default_value_t = 24)]
        hours: u32,
        /// Deribit chart window instead of raw history (8h, 24h, 1m)
        #[arg(long, conflicts_with = "hourly")]
        chart: Option<ChartLength>,
        /// Deribit hourly rates (interest_1h) instead of 8h rates
        #[arg(long)]
        hourly: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    let args = Args::parse();
    telemetry::init_tracing(&args.log_level);

    let config = AggregatorConfig::load(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            if let Some(port) = args.metrics_port {
                telemetry::install_metrics_exporter(port);
            }
            let mut aggregator = Aggregator::from_config(config)?;
            if let Some(path) = aggregator.run(shutdown_signal()).await {
                info!("👋 Final summary at {}", path.display());
            }
        }
        Command::Summary { write } => {
            let aggregator = Aggregator::new(config, Vec::new())?;
            let now = Utc::now();
            println!("{}", aggregator.generate_summary(now));
            if write {
                aggregator.write_summary(SUMMARY_PREFIX, now)?;
            }
        }
        Command::History {
            exchange,
            instrument,
            hours,
            chart,
            hourly,
        } => print_history(&config, exchange, &instrument, hours, chart, hourly).await?,
    }

    Ok(())
}

async fn print_history(
    config: &AggregatorConfig,
    exchange: Exchange,
    instrument: &str,
    hours: u32,
    chart: Option<ChartLength>,
    hourly: bool,
) -> Result<()> {
    let venue = config.venue(exchange);
    let timeout = config.fetch_timeout();
    let end = Utc::now();
    let start = end - Duration::hours(i64::from(hours));

    if exchange == Exchange::Binance && (chart.is_some() || hourly) {
        anyhow::bail!("--chart and --hourly are only available for deribit");
    }

    let mut accrued = None;
    let samples = match exchange {
        Exchange::Binance => {
            BinanceClient::new(&venue.base_url, venue.api_key.as_deref(), timeout)?
                .fetch_historical_rates(instrument, start, end)
                .await
        }
        Exchange::Deribit => {
            let client = DeribitClient::new(&venue.base_url, timeout)?;
            match chart {
                Some(length) => client.fetch_funding_chart(instrument, length).await,
                None => {
                    match client.fetch_funding_rate_value(instrument, start, end).await {
                        Ok(value) => accrued = Some(value),
                        Err(e) => tracing::warn!("accrued funding unavailable: {:#}", e),
                    }
                    if hourly {
                        client.fetch_hourly_history(instrument, start, end).await
                    } else {
                        client.fetch_historical_rates(instrument, start, end).await
                    }
                }
            }
        }
    }
    .with_context(|| format!("history for {instrument} on {exchange}"))?;

    if samples.is_empty() {
        println!("No funding history for {instrument} on {exchange}");
    }
    for s in &samples {
        println!(
            "{}  {:<6} {:>10.4}%",
            s.timestamp.format("%Y-%m-%d %H:%M:%S"),
            s.symbol,
            s.rate
        );
    }
    if let Some(value) = accrued {
        println!("Accrued funding over the last {hours}h: {value:.4}%");
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

fn load_env() {
    // Standard dotenv search (cwd + parents), then the crate root.
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
