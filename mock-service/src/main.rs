use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_ADDR: &str = "0.0.0.0:8080";
const ADDR_ENV: &str = "MOCK_SERVICE_ADDR";
const METRICS_ADDR_ENV: &str = "MOCK_SERVICE_METRICS_ADDR";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mock_service=info,tower_http=info"));
    FmtSubscriber::builder().with_env_filter(filter).init();

    if let Ok(metrics_addr) = std::env::var(METRICS_ADDR_ENV) {
        let metrics_addr: SocketAddr = metrics_addr
            .parse()
            .with_context(|| format!("invalid {METRICS_ADDR_ENV}"))?;
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
            .context("failed to install the Prometheus exporter")?;
    }

    let addr: SocketAddr = std::env::var(ADDR_ENV)
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()
        .with_context(|| format!("invalid {ADDR_ENV}"))?;

    mock_service::run(addr).await
}
