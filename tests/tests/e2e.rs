mod utils;
use utils::*;

use canary::prelude::*;
use canary_core::{MetricSummary, ThresholdResult, ERRORS, HTTP_REQ_DURATION, HTTP_REQ_FAILED};
use std::time::Duration;

fn threshold<'a>(report: &'a Report, metric: &str) -> &'a ThresholdResult {
    report
        .thresholds
        .iter()
        .find(|t| t.metric == metric)
        .unwrap()
}

fn metric<'a>(report: &'a Report, name: &str) -> &'a MetricSummary {
    report.metrics.iter().find(|m| m.name == name).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(20_000)]
async fn healthy_target_passes() {
    let (addr, server) = target().await;
    let config = config(
        addr,
        "/delay/ms/20",
        vec![Stage::new(secs(1), 2), Stage::new(secs(1), 4)],
    );

    let mut run = TestRun::new(config).unwrap();
    let report = run.run().await.unwrap();

    assert!(report.passed, "{report}");
    assert!(report.requests > 10);
    assert_eq!(report.requests, server.requests());
    assert!(run.peak_workers() <= 4);

    let duration = metric(&report, HTTP_REQ_DURATION);
    assert_eq!(duration.count, report.requests);
    let latency = duration.latency.unwrap();
    assert!(latency.min >= Duration::from_millis(20));
    assert!(latency.p95 < Duration::from_millis(300));

    assert_eq!(threshold(&report, HTTP_REQ_FAILED).observed, Some(0.));
    assert_eq!(metric(&report, ERRORS).failures, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(20_000)]
async fn server_errors_fail_the_run() {
    let (addr, _) = target().await;
    let config = config(addr, "/status/500", vec![Stage::new(secs(1), 3)]);

    let report = TestRun::new(config).unwrap().run().await.unwrap();

    assert!(!report.passed);
    assert!(report.requests > 0);
    let failed = threshold(&report, HTTP_REQ_FAILED);
    assert!(!failed.passed);
    assert_eq!(failed.observed, Some(1.));
    assert_eq!(metric(&report, ERRORS).failures, report.requests);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(20_000)]
async fn client_errors_are_not_failures() {
    let (addr, _) = target().await;
    let config = config(addr, "/status/404", vec![Stage::new(secs(1), 2)]);

    let report = TestRun::new(config).unwrap().run().await.unwrap();

    assert!(report.passed, "{report}");
    assert_eq!(threshold(&report, HTTP_REQ_FAILED).observed, Some(0.));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(20_000)]
async fn unreachable_target_records_failures() {
    init();
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let config = config(addr, "/", vec![Stage::new(secs(1), 2)]);

    let report = TestRun::new(config).unwrap().run().await.unwrap();

    assert!(!report.passed);
    assert!(report.requests > 0);
    assert_eq!(threshold(&report, HTTP_REQ_FAILED).observed, Some(1.));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(20_000)]
async fn timeouts_record_the_timeout_as_latency() {
    let (addr, _) = target().await;
    let timeout = Duration::from_millis(200);
    let config = config(addr, "/delay/ms/5000", vec![Stage::new(secs(1), 2)])
        .with_request_timeout(timeout);

    let report = TestRun::new(config).unwrap().run().await.unwrap();

    assert!(!report.passed);
    assert_eq!(threshold(&report, HTTP_REQ_FAILED).observed, Some(1.));
    let latency = metric(&report, HTTP_REQ_DURATION).latency.unwrap();
    assert_eq!(latency.min, timeout);
    assert_eq!(latency.max, timeout);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(20_000)]
async fn rate_limited_target_fails_partially() {
    let (addr, _) = target().await;
    let config = config(
        addr,
        "/limited/5/delay/ms/1/server/e2e",
        vec![Stage::new(secs(2), 4)],
    )
    .with_ramp(RampPolicy::Step)
    .with_pacing(Duration::from_millis(10));

    let report = TestRun::new(config).unwrap().run().await.unwrap();

    let failed = threshold(&report, HTTP_REQ_FAILED);
    let rate = failed.observed.unwrap();
    assert!(rate > 0. && rate < 1., "failure rate {rate}");
    assert!(!failed.passed);
    assert!(!report.passed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(20_000)]
async fn abort_on_fail_stops_early() {
    let (addr, _) = target().await;
    let config = config(addr, "/status/503", vec![Stage::new(secs(60), 2)])
        .with_ramp(RampPolicy::Step)
        .with_thresholds([(
            HTTP_REQ_FAILED,
            ThresholdSpec::Detailed {
                threshold: "rate<0.1".to_string(),
                abort_on_fail: true,
            },
        )]);

    let report = TestRun::new(config).unwrap().run().await.unwrap();

    assert!(report.aborted);
    assert!(!report.passed);
    assert!(report.elapsed < secs(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(20_000)]
async fn stop_handle_ends_the_run() {
    let (addr, server) = target().await;
    let config = config(addr, "/delay/ms/10", vec![Stage::new(secs(60), 3)])
        .with_ramp(RampPolicy::Step);

    let mut run = TestRun::new(config).unwrap();
    let stop = run.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        stop.stop();
    });
    let report = run.run().await.unwrap();

    assert!(report.elapsed < secs(5));
    assert_eq!(run.live_workers(), 0);
    assert_eq!(report.requests, server.requests());

    // Nothing reaches the target once the run is over.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(report.requests, server.requests());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(20_000)]
async fn report_serializes_to_json() {
    let (addr, _) = target().await;
    let config = config(addr, "/", vec![Stage::new(secs(1), 1)]).with_ramp(RampPolicy::Step);

    let report = TestRun::new(config).unwrap().run().await.unwrap();
    let value = serde_json::to_value(&report).unwrap();

    assert_eq!(value["passed"], true);
    assert_eq!(value["requests"], report.requests);
    assert_eq!(value["metrics"].as_array().unwrap().len(), 4);
    assert_eq!(value["thresholds"].as_array().unwrap().len(), 2);
}
