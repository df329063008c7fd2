use crate::client::HttpClient;
use crate::recorder::Recorder;
use canary_core::RequestOutcome;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Inputs shared by every worker of a run.
#[derive(Debug, Clone)]
pub(crate) struct WorkerSettings {
    pub url: String,
    pub pacing: Duration,
    pub request_timeout: Duration,
}

/// Counters shared between the workers and the scheduler.
#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    live: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicU64,
}

impl WorkerCounters {
    /// Workers whose task is currently running, retiring ones included.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest `live` value observed so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Iterations whose outcome reached the recorder.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    fn enter(self: &Arc<Self>) -> LiveGuard {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
        LiveGuard(self.clone())
    }
}

/// Decrements the live count when the worker exits, including when its task is aborted.
struct LiveGuard(Arc<WorkerCounters>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A virtual user: request, record, pace, repeat until its token is cancelled.
pub(crate) struct Worker<C> {
    pub id: usize,
    pub client: Arc<C>,
    pub recorder: Arc<Recorder>,
    pub settings: Arc<WorkerSettings>,
    pub counters: Arc<WorkerCounters>,
    pub token: CancellationToken,
}

impl<C: HttpClient> Worker<C> {
    pub async fn run(self) {
        let _guard = self.counters.enter();
        trace!("Worker {} started.", self.id);

        while !self.token.is_cancelled() {
            // NOTE: An in-flight request is not interrupted by the token; it is bounded by the
            // request timeout and its outcome is always recorded.
            let outcome = self.request().await;
            self.record(&outcome);

            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(self.settings.pacing) => {}
            }
        }

        trace!("Worker {} stopped.", self.id);
    }

    async fn request(&self) -> RequestOutcome {
        let timeout = self.settings.request_timeout;
        let start = Instant::now();
        let res = tokio::time::timeout(timeout, self.client.get(&self.settings.url)).await;

        match res {
            Ok(Ok(status)) => RequestOutcome::response(status, start.elapsed()),
            Ok(Err(err)) => {
                trace!("Worker {} request failed: {err}", self.id);
                RequestOutcome::failure(start.elapsed())
            }
            Err(_) => {
                trace!("Worker {} request timed out after {timeout:?}", self.id);
                RequestOutcome::failure(timeout)
            }
        }
    }

    fn record(&self, outcome: &RequestOutcome) {
        match self.recorder.record_all(outcome) {
            Ok(()) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => error!("Worker {} failed to record an outcome: {err}", self.id),
        }
    }
}
