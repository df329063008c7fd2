//! A complete test run: ramp the workers, watch the thresholds, and produce a [`Report`].
use crate::client::{HttpClient, ReqwestClient};
use crate::error::RunError;
use crate::evaluator::Evaluator;
use crate::recorder::Recorder;
use crate::scheduler::{RampScheduler, SchedulerState};
use canary_core::{ConfigError, Report, RunConfig, ThresholdResult, ABORT_CHECK_INTERVAL};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Requests an early, graceful end to a [`TestRun`] from another task.
#[derive(Debug, Clone)]
pub struct StopHandle(CancellationToken);

impl StopHandle {
    pub fn stop(&self) {
        self.0.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// A load test against one target.
///
/// # Example
/// ```no_run
/// use canary::prelude::*;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), RunError> {
///     let config = RunConfig::default()
///         .with_base_url("http://localhost:8080/health")
///         .with_stages(vec![Stage::new(Duration::from_secs(30), 10)]);
///
///     let report = TestRun::new(config)?.run().await?;
///     println!("{report}");
///     Ok(())
/// }
/// ```
pub struct TestRun<C = ReqwestClient> {
    config: RunConfig,
    client: Arc<C>,
    recorder: Arc<Recorder>,
    evaluator: Evaluator,
    scheduler: RampScheduler<C>,
    stop: CancellationToken,
    aborted_by: Option<ThresholdResult>,
    report: Option<Report>,
}

impl TestRun<ReqwestClient> {
    pub fn new(config: RunConfig) -> Result<Self, ConfigError> {
        Self::with_client(config, ReqwestClient::new())
    }
}

impl<C: HttpClient> TestRun<C> {
    /// Validate `config` and prepare a run that issues its requests through `client`.
    pub fn with_client(config: RunConfig, client: C) -> Result<Self, ConfigError> {
        config.validate()?;
        let evaluator = Evaluator::new(&config)?;
        let recorder = Arc::new(Recorder::new(&config.metrics, config.sample_capacity));
        let client = Arc::new(client);
        let scheduler = RampScheduler::new(&config, client.clone(), recorder.clone());

        Ok(Self {
            config,
            client,
            recorder,
            evaluator,
            scheduler,
            stop: CancellationToken::new(),
            aborted_by: None,
            report: None,
        })
    }

    /// Spawn the first workers without waiting for the run to finish.
    pub fn start(&mut self) -> Result<(), RunError> {
        self.scheduler.start(self.config.stages.clone())
    }

    /// Drive the run to completion: every stage elapses, a stop is requested, or an
    /// `abort_on_fail` threshold fails. Starts the run if `start` was not called.
    #[instrument(name = "test_run", skip_all, fields(target = %self.config.base_url))]
    pub async fn run(&mut self) -> Result<Report, RunError> {
        match self.scheduler.state() {
            SchedulerState::Idle => self.start()?,
            SchedulerState::Ramping(_) => {}
            SchedulerState::Draining | SchedulerState::Stopped => {
                return Err(RunError::AlreadyStarted)
            }
        }

        let watch_aborts = self.evaluator.has_abort_thresholds();
        let mut abort_check = interval(ABORT_CHECK_INTERVAL);
        abort_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    info!("Stop requested.");
                    break;
                }
                _ = self.scheduler.next_tick() => {
                    if self.scheduler.tick() == SchedulerState::Draining {
                        break;
                    }
                }
                _ = abort_check.tick(), if watch_aborts => {
                    if let Some(failed) = self.evaluator.check_aborts(&self.recorder) {
                        warn!("Aborting run: {failed}");
                        self.aborted_by = Some(failed);
                        break;
                    }
                }
            }
        }

        self.finish().await
    }

    /// Stop a started run and build its report. Returns the existing report if already finished.
    pub async fn stop(&mut self) -> Result<Report, RunError> {
        if let Some(report) = &self.report {
            return Ok(report.clone());
        }
        if self.scheduler.state() == SchedulerState::Idle {
            return Err(RunError::NotStarted);
        }
        self.stop.cancel();
        self.finish().await
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Worker tasks currently running.
    pub fn live_workers(&self) -> usize {
        self.scheduler.live_workers()
    }

    pub fn peak_workers(&self) -> usize {
        self.scheduler.peak_workers()
    }

    async fn finish(&mut self) -> Result<Report, RunError> {
        let stopped = self.scheduler.stop().await;
        debug!(
            "Stopped {} workers ({} aborted), {} iterations completed.",
            stopped.workers,
            stopped.aborted,
            self.scheduler.completed()
        );

        let thresholds = self.evaluator.evaluate(&self.recorder);
        let report = Report {
            passed: self.aborted_by.is_none() && Evaluator::verdict(&thresholds),
            aborted: self.aborted_by.is_some(),
            elapsed: self.scheduler.elapsed(),
            requests: self.recorder.recorded(),
            thresholds,
            metrics: self.recorder.summaries()?,
        };

        info!(
            "Run finished: {} requests, verdict {}.",
            report.requests,
            if report.passed { "PASS" } else { "FAIL" }
        );
        self.report = Some(report.clone());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{MockClient, Reply};
    use canary_core::{RampPolicy, Stage, ThresholdSpec, HTTP_REQ_DURATION, HTTP_REQ_FAILED};
    use std::time::Duration;

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    fn config(stages: Vec<Stage>) -> RunConfig {
        RunConfig::default()
            .with_stages(stages)
            .with_pacing(ms(100))
            .with_request_timeout(Duration::from_secs(2))
            .with_grace_period(Duration::from_secs(1))
    }

    fn threshold<'a>(report: &'a Report, metric: &str) -> &'a ThresholdResult {
        report
            .thresholds
            .iter()
            .find(|t| t.metric == metric)
            .unwrap()
    }

    #[tracing_test::traced_test]
    #[tokio::test(start_paused = true)]
    #[ntest::timeout(5_000)]
    async fn healthy_target_passes() {
        let config = config(vec![
            Stage::new(Duration::from_secs(1), 2),
            Stage::new(Duration::from_secs(1), 5),
        ]);
        let mut run = TestRun::with_client(config, MockClient::ok(ms(50))).unwrap();
        let report = run.run().await.unwrap();

        assert!(report.passed);
        assert!(!report.aborted);
        assert!(report.requests > 0);
        assert_eq!(report.requests, run.client().calls());
        assert!(run.peak_workers() <= 5);
        assert_eq!(run.live_workers(), 0);
        assert_eq!(run.state(), SchedulerState::Stopped);

        let duration = threshold(&report, HTTP_REQ_DURATION);
        assert!(duration.passed);
        assert_eq!(duration.observed, Some(50.));
        assert_eq!(
            run.recorder().percentile(HTTP_REQ_DURATION, 95.).unwrap(),
            ms(50)
        );

        let failed = threshold(&report, HTTP_REQ_FAILED);
        assert!(failed.passed);
        assert_eq!(failed.observed, Some(0.));

        assert!(logs_contain("verdict PASS"));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_target_fails() {
        let config = config(vec![Stage::new(Duration::from_secs(1), 3)]);
        let client = MockClient::new(ms(20), Reply::Status(500));
        let mut run = TestRun::with_client(config, client).unwrap();
        let report = run.run().await.unwrap();

        assert!(!report.passed);
        assert!(!report.aborted);
        let failed = threshold(&report, HTTP_REQ_FAILED);
        assert!(!failed.passed);
        assert_eq!(failed.observed, Some(1.));
        assert_eq!(report.failed_thresholds().count(), 1);
    }

    #[test]
    fn undefined_threshold_metric_is_rejected() {
        let config = config(vec![Stage::new(Duration::from_secs(1), 1)])
            .with_thresholds([("latency_p99_ms", ThresholdSpec::from("p(99)<500"))]);

        assert!(matches!(
            TestRun::with_client(config, MockClient::ok(ms(1))),
            Err(ConfigError::UnknownMetric(m)) if m == "latency_p99_ms"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_abort_threshold_ends_the_run_early() {
        let config = config(vec![Stage::new(Duration::from_secs(30), 4)])
            .with_ramp(RampPolicy::Step)
            .with_thresholds([(
            HTTP_REQ_FAILED,
            ThresholdSpec::Detailed {
                threshold: "rate<0.5".to_string(),
                abort_on_fail: true,
            },
        )]);
        let client = MockClient::new(ms(10), Reply::NetworkError);
        let mut run = TestRun::with_client(config, client).unwrap();
        let report = run.run().await.unwrap();

        assert!(report.aborted);
        assert!(!report.passed);
        assert!(report.elapsed < Duration::from_secs(3));
        assert_eq!(report.requests, run.client().calls());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_handle_ends_the_run() {
        let config =
            config(vec![Stage::new(Duration::from_secs(60), 2)]).with_ramp(RampPolicy::Step);
        let mut run = TestRun::with_client(config, MockClient::ok(ms(10))).unwrap();

        let handle = run.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(ms(500)).await;
            handle.stop();
        });
        let report = run.run().await.unwrap();

        assert!(!report.aborted);
        assert!(report.requests > 0);
        assert!(report.elapsed < Duration::from_secs(2));
        assert_eq!(run.live_workers(), 0);
        assert_eq!(run.report(), Some(&report));
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_errors() {
        let config = config(vec![Stage::new(Duration::from_millis(300), 1)]);
        let mut run = TestRun::with_client(config, MockClient::ok(ms(10))).unwrap();

        assert!(matches!(run.stop().await, Err(RunError::NotStarted)));

        let report = run.run().await.unwrap();
        assert!(matches!(run.run().await, Err(RunError::AlreadyStarted)));
        assert_eq!(run.stop().await.unwrap(), report);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_start_and_stop() {
        let config =
            config(vec![Stage::new(Duration::from_secs(10), 2)]).with_ramp(RampPolicy::Step);
        let mut run = TestRun::with_client(config, MockClient::ok(ms(10))).unwrap();

        run.start().unwrap();
        tokio::time::sleep(ms(450)).await;
        let report = run.stop().await.unwrap();

        assert!(report.requests > 0);
        assert_eq!(report.requests, run.client().calls());
        assert_eq!(run.state(), SchedulerState::Stopped);
    }
}
