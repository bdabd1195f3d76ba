//! Logging and metrics setup

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_LOG_DIRECTIVE: &str = "funding_aggregator=info";

pub mod names {
    pub const FETCH_CYCLES: &str = "funding_fetch_cycles_total";
    pub const FETCH_FAILURES: &str = "funding_fetch_failures_total";
    pub const SAMPLES_APPENDED: &str = "funding_samples_appended_total";
    pub const STORE_SAMPLES: &str = "funding_store_samples";
    pub const ALERTS: &str = "funding_alerts_total";
    pub const ARBITRAGE: &str = "funding_arbitrage_total";
    pub const PERSIST_FAILURES: &str = "funding_persist_failures_total";
}

/// `RUST_LOG` wins; otherwise `default_directive`.
pub fn init_tracing(default_directive: &str) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Serve Prometheus metrics on `port`. Failure is logged, not fatal.
pub fn install_metrics_exporter(port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!("📈 Prometheus exporter listening on {}", addr),
        Err(e) => tracing::warn!(
            "Failed to start Prometheus exporter on {}: {} (continuing without metrics)",
            addr,
            e
        ),
    }
}
