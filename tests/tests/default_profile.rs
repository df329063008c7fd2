mod utils;
#[allow(unused)]
use utils::*;

#[cfg(feature = "integration")]
mod tests {
    use super::*;
    use canary::prelude::*;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::net::SocketAddr;

    /// The full five minute ramp to 100 workers against a healthy target.
    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(400_000)]
    async fn default_profile_passes() {
        let (addr, server) = target().await;

        PrometheusBuilder::new()
            .with_http_listener("127.0.0.1:8002".parse::<SocketAddr>().unwrap())
            .install()
            .unwrap();

        let config = RunConfig::default().with_base_url(format!("http://{addr}/delay/ms/20"));
        let mut run = TestRun::new(config).unwrap();
        let report = run.run().await.unwrap();

        println!("{report}");
        assert!(report.passed);
        assert!(run.peak_workers() <= 100);
        assert_eq!(report.requests, server.requests());
    }
}
