use canary::prelude::*;
use mock_service::AppState;
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::FmtSubscriber;

#[allow(unused)]
pub fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        let _ = FmtSubscriber::builder()
            .with_env_filter("canary=debug,mock_service=info")
            .with_test_writer()
            .try_init();
    });
}

/// A fresh mock service on an ephemeral port.
#[allow(unused)]
pub async fn target() -> (SocketAddr, AppState) {
    init();
    mock_service::spawn_local().await.unwrap()
}

/// A short run against `path` on the mock service.
#[allow(unused)]
pub fn config(addr: SocketAddr, path: &str, stages: Vec<Stage>) -> RunConfig {
    RunConfig::default()
        .with_base_url(format!("http://{addr}{path}"))
        .with_stages(stages)
        .with_pacing(Duration::from_millis(50))
        .with_request_timeout(Duration::from_secs(2))
        .with_grace_period(Duration::from_secs(2))
}

#[allow(unused)]
pub fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}
