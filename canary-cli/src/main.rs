use anyhow::Context;
use canary::TestRun;
use canary_core::Report;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::process::ExitCode;
#[allow(unused)]
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod args;
mod report;

use args::Args;

const DEFAULT_LOG_FILTER: &str = "canary=info";

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(report) => ExitCode::from(report::report_exit_code(&report)),
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(report::error_exit_code(&err))
        }
    }
}

async fn run(args: Args) -> anyhow::Result<Report> {
    let config = args.load_config()?;

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install the Prometheus exporter")?;
        info!("Serving metrics on {addr}.");
    }

    let mut test = TestRun::new(config)?;

    let stop = test.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping the run.");
            stop.stop();
        }
    });

    let report = test.run().await?;
    report::write_report(&mut std::io::stdout().lock(), &report, args.json)?;
    Ok(report)
}
