//! A small HTTP target with controllable latency and failures, for exercising load tests.
use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
#[allow(unused)]
use metrics::{counter, gauge, histogram};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

#[derive(Clone, Default)]
pub struct AppState {
    limiters: Arc<Mutex<HashMap<String, Arc<DefaultDirectRateLimiter>>>>,
    requests: Arc<AtomicU64>,
}

impl AppState {
    /// Requests received so far, on any route.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ok))
        .route("/delay/ms/:delay_ms", get(delay))
        .route("/jitter/ms/:mean_ms/:std_ms", get(jitter))
        .route("/status/:code", get(status))
        .route("/flaky/:percent/delay/ms/:delay_ms", get(flaky))
        .route(
            "/limited/:max_tps/delay/ms/:delay_ms/server/:server_id",
            get(limited),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already bound listener until the process exits.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    info!("Mock service listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Serve on `addr`, logging the request rate every second.
pub async fn run(addr: SocketAddr) -> anyhow::Result<()> {
    let state = AppState::default();
    tokio::spawn(tps_measure_task(state.clone()));
    serve(TcpListener::bind(addr).await?, state).await
}

/// Bind an ephemeral localhost port and serve in the background.
pub async fn spawn_local() -> anyhow::Result<(SocketAddr, AppState)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = AppState::default();

    let server_state = state.clone();
    tokio::spawn(async move {
        if let Err(err) = serve(listener, server_state).await {
            error!("Mock service failed: {err:#}");
        }
    });
    Ok((addr, state))
}

fn count(state: &AppState) {
    counter!("mock_service_requests_total").increment(1);
    state.requests.fetch_add(1, Ordering::Relaxed);
}

async fn ok(State(state): State<AppState>) -> &'static str {
    count(&state);
    "ok"
}

#[debug_handler]
async fn delay(State(state): State<AppState>, Path(delay_ms): Path<u64>) {
    count(&state);
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}

#[debug_handler]
async fn jitter(
    State(state): State<AppState>,
    Path((mean_ms, std_ms)): Path<(f64, f64)>,
) -> Result<(), StatusCode> {
    count(&state);
    let normal = Normal::new(mean_ms, std_ms).map_err(|_| StatusCode::BAD_REQUEST)?;
    let sample: f64 = normal.sample(&mut rand::thread_rng()).max(0.);
    tokio::time::sleep(Duration::from_secs_f64(sample / 1_000.)).await;
    Ok(())
}

#[debug_handler]
async fn status(State(state): State<AppState>, Path(code): Path<u16>) -> StatusCode {
    count(&state);
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

/// Fails `percent` percent of requests with a 500.
#[debug_handler]
async fn flaky(
    State(state): State<AppState>,
    Path((percent, delay_ms)): Path<(f64, u64)>,
) -> StatusCode {
    count(&state);
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    if rand::thread_rng().gen_bool((percent / 100.).clamp(0., 1.)) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

/// Answers with a 500 once `max_tps` is exceeded for `server_id`.
#[debug_handler]
async fn limited(
    State(state): State<AppState>,
    Path((max_tps, delay_ms, server_id)): Path<(u32, u64, String)>,
) -> Result<(), StatusCode> {
    count(&state);
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;

    let tps = NonZeroU32::new(max_tps).ok_or(StatusCode::BAD_REQUEST)?;
    let limiter = state
        .limiters
        .lock()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .entry(server_id)
        .or_insert_with(|| Arc::new(rate_limiter(tps)))
        .clone();

    limiter.check().map_err(|_| {
        debug!("Rate limit of {max_tps} TPS exceeded.");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub fn rate_limiter(tps: NonZeroU32) -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(tps))
}

/// Logs the request rate once per second.
pub async fn tps_measure_task(state: AppState) {
    let mut last = state.requests();
    loop {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let total = state.requests();
        let tps = total - last;
        last = total;
        gauge!("mock_service_tps").set(tps as f64);
        info!("{tps} TPS");
    }
}
