use std::time::Duration;

/// Target used when neither the config file nor the environment name one.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Environment variable overriding the configured base URL.
pub const TARGET_HOST_ENV: &str = "TARGET_HOST";

/// Sleep between two requests of the same worker.
pub const DEFAULT_PACING: Duration = Duration::from_millis(100);

/// Upper bound on a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How often the ramp scheduler recomputes the desired concurrency.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// How long `stop()` waits for workers before aborting them.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How often `abort_on_fail` thresholds are checked while a run is in progress.
pub const ABORT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Latency samples held per trend series before reservoir sampling kicks in.
pub const DEFAULT_SAMPLE_CAPACITY: usize = 100_000;

/// Built-in request duration trend.
pub const HTTP_REQ_DURATION: &str = "http_req_duration";

/// Built-in request failure rate.
pub const HTTP_REQ_FAILED: &str = "http_req_failed";

/// Custom latency trend, recorded alongside the built-in one.
pub const LATENCY_P95_MS: &str = "latency_p95_ms";

/// Custom error rate, recorded alongside the built-in one.
pub const ERRORS: &str = "errors";
