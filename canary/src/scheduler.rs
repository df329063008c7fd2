//! Staged-ramp scheduling of virtual users.
//!
//! The scheduler owns the worker tasks. On every tick it computes the desired worker count for
//! the elapsed time and spawns or retires workers to match it.
use crate::client::HttpClient;
use crate::error::RunError;
use crate::recorder::Recorder;
use crate::worker::{Worker, WorkerCounters, WorkerSettings};
use canary_core::{validate_stages, ConfigError, RampPolicy, RunConfig, Stage};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

mod timer;

use timer::Timer;

/// Lifecycle of a [`RampScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// Running the stage with the given index.
    Ramping(usize),
    /// All stages have elapsed; waiting for `stop`.
    Draining,
    Stopped,
}

/// Desired worker count for `elapsed` time into the run, with the index of the active stage.
///
/// `None` once every stage has elapsed. Under [`RampPolicy::Linear`] the count moves from the
/// previous stage's target (zero for the first stage) to the current one, rounded to the nearest
/// integer. Under [`RampPolicy::Step`] it jumps to the stage target immediately.
pub fn ramp_target(
    stages: &[Stage],
    policy: RampPolicy,
    elapsed: Duration,
) -> Option<(usize, usize)> {
    let mut stage_start = Duration::ZERO;
    let mut previous = 0;

    for (index, stage) in stages.iter().enumerate() {
        let stage_end = stage_start + stage.duration;
        if elapsed < stage_end {
            let desired = match policy {
                RampPolicy::Step => stage.target,
                RampPolicy::Linear => {
                    let progress =
                        (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                    let from = previous as f64;
                    let to = stage.target as f64;
                    (from + (to - from) * progress).round() as usize
                }
            };
            return Some((index, desired));
        }
        previous = stage.target;
        stage_start = stage_end;
    }

    None
}

/// What `stop` had to do to bring the workers down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopSummary {
    pub workers: usize,
    pub aborted: usize,
}

struct WorkerHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct RampScheduler<C> {
    stages: Vec<Stage>,
    policy: RampPolicy,
    tick_interval: Duration,
    grace_period: Duration,
    state: SchedulerState,

    client: Arc<C>,
    recorder: Arc<Recorder>,
    settings: Arc<WorkerSettings>,
    counters: Arc<WorkerCounters>,

    stop: CancellationToken,
    workers: Vec<WorkerHandle>,
    // NOTE: Retired workers still count against the desired total until they exit, so the live
    // count never exceeds the largest stage target.
    retiring: Vec<JoinHandle<()>>,
    next_id: usize,

    timer: Option<Timer>,
    started_at: Option<Instant>,
}

impl<C: HttpClient> RampScheduler<C> {
    pub fn new(config: &RunConfig, client: Arc<C>, recorder: Arc<Recorder>) -> Self {
        Self {
            stages: vec![],
            policy: config.ramp,
            tick_interval: config.tick_interval,
            grace_period: config.grace_period,
            state: SchedulerState::Idle,

            client,
            recorder,
            settings: Arc::new(WorkerSettings {
                url: config.base_url.clone(),
                pacing: config.pacing,
                request_timeout: config.request_timeout,
            }),
            counters: Arc::new(WorkerCounters::default()),

            stop: CancellationToken::new(),
            workers: vec![],
            retiring: vec![],
            next_id: 0,

            timer: None,
            started_at: None,
        }
    }

    /// Begin the first stage. Must be called from within a Tokio runtime.
    pub fn start(&mut self, stages: Vec<Stage>) -> Result<(), RunError> {
        if self.state != SchedulerState::Idle {
            return Err(RunError::AlreadyStarted);
        }
        validate_stages(&stages)?;
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                field: "tick_interval",
                value: self.tick_interval,
            }
            .into());
        }

        info!(
            "Starting ramp over {} stages ({}), peaking at {} workers.",
            stages.len(),
            humantime::format_duration(stages.iter().map(|s| s.duration).sum::<Duration>()),
            stages.iter().map(|s| s.target).max().unwrap_or(0),
        );

        self.stages = stages;
        self.timer = Some(Timer::new(self.tick_interval));
        self.started_at = Some(Instant::now());
        self.state = SchedulerState::Ramping(0);
        self.tick();
        Ok(())
    }

    /// Wait until the next tick is due. Pending forever if the scheduler was never started.
    pub async fn next_tick(&mut self) {
        match &mut self.timer {
            Some(timer) => {
                let elapsed = timer.tick().await;
                if elapsed > self.tick_interval * 2 {
                    warn!(
                        "Scheduler tick ({timer}) delayed: {} since the last one.",
                        humantime::format_duration(elapsed)
                    );
                }
            }
            None => std::future::pending().await,
        }
    }

    /// Reconcile the worker count with the ramp and report the resulting state.
    pub fn tick(&mut self) -> SchedulerState {
        let (SchedulerState::Ramping(current), Some(started_at)) = (self.state, self.started_at)
        else {
            return self.state;
        };

        match ramp_target(&self.stages, self.policy, started_at.elapsed()) {
            Some((stage, desired)) => {
                if stage != current {
                    info!(
                        "Entering stage {stage} (target {}).",
                        self.stages[stage].target
                    );
                }
                self.state = SchedulerState::Ramping(stage);
                self.reconcile(desired);
            }
            None => {
                info!("All stages complete.");
                self.state = SchedulerState::Draining;
            }
        }

        self.state
    }

    /// Signal every worker and wait up to the grace period for them to finish; abort stragglers.
    pub async fn stop(&mut self) -> StopSummary {
        if self.state == SchedulerState::Stopped {
            return StopSummary::default();
        }
        self.state = SchedulerState::Draining;
        self.stop.cancel();

        let handles: Vec<JoinHandle<()>> = self
            .workers
            .drain(..)
            .map(|w| w.handle)
            .chain(self.retiring.drain(..))
            .collect();
        let workers = handles.len();
        let deadline = Instant::now() + self.grace_period;
        let mut aborted = 0;

        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("Worker task failed: {err}"),
                Err(_) => {
                    handle.abort();
                    let _ = handle.await;
                    aborted += 1;
                }
            }
        }

        if aborted > 0 {
            warn!(
                "Aborted {aborted} of {workers} workers after the {} grace period.",
                humantime::format_duration(self.grace_period)
            );
        }

        #[cfg(feature = "metrics")]
        metrics::gauge!("canary_active_workers").set(0.);

        self.state = SchedulerState::Stopped;
        info!("Scheduler stopped ({workers} workers).");
        StopSummary { workers, aborted }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Time since `start`.
    pub fn elapsed(&self) -> Duration {
        self.started_at
            .map(|s| s.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Workers the scheduler currently wants running.
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    /// Worker tasks still running, including retiring ones.
    pub fn live_workers(&self) -> usize {
        self.counters.live()
    }

    pub fn peak_workers(&self) -> usize {
        self.counters.peak()
    }

    /// Iterations whose outcome was recorded.
    pub fn completed(&self) -> u64 {
        self.counters.completed()
    }

    fn reconcile(&mut self, desired: usize) {
        self.retiring.retain(|h| !h.is_finished());
        let current = self.workers.len();

        if current > desired {
            for worker in self.workers.drain(desired..) {
                worker.token.cancel();
                self.retiring.push(worker.handle);
            }
            debug!("Retiring {} workers ({current} -> {desired}).", current - desired);
        } else {
            let mut spawned = 0;
            while self.workers.len() + self.retiring.len() < desired {
                self.spawn_worker();
                spawned += 1;
            }
            if spawned > 0 {
                debug!(
                    "Spawned {spawned} workers ({current} -> {}).",
                    self.workers.len()
                );
            }
        }

        #[cfg(feature = "metrics")]
        metrics::gauge!("canary_active_workers").set(self.workers.len() as f64);
    }

    fn spawn_worker(&mut self) {
        let id = self.next_id;
        self.next_id += 1;
        let token = self.stop.child_token();

        let worker = Worker {
            id,
            client: self.client.clone(),
            recorder: self.recorder.clone(),
            settings: self.settings.clone(),
            counters: self.counters.clone(),
            token: token.clone(),
        };

        trace!("Spawning worker {id}.");
        let handle = tokio::spawn(worker.run().in_current_span());
        self.workers.push(WorkerHandle { token, handle });
    }
}

impl<C> Drop for RampScheduler<C> {
    fn drop(&mut self) {
        self.stop.cancel();
        for worker in &self.workers {
            worker.handle.abort();
        }
        for handle in &self.retiring {
            handle.abort();
        }
    }
}
