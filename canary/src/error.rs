use canary_core::ConfigError;
use std::sync::PoisonError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetricsError {
    #[error("Metric {0:?} is not defined")]
    UnknownMetric(String),

    #[error("Metric {0:?} has no recorded samples")]
    NoData(String),

    #[error("Percentile {0} is outside [0, 100]")]
    InvalidPercentile(f64),

    #[error("Metric {name:?} is a {kind} metric and holds no latency samples")]
    WrongKind { name: String, kind: &'static str },

    #[error("Metric storage mutex is poisoned")]
    PoisonData,
}

impl<T> From<PoisonError<T>> for MetricsError {
    fn from(_err: PoisonError<T>) -> Self {
        Self::PoisonData
    }
}

/// Failure to obtain any response from the target.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Request timed out")]
    Timeout,

    #[error("Network failure: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to read metrics: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Run was already started")]
    AlreadyStarted,

    #[error("Run has not been started")]
    NotStarted,
}
