use std::time::Duration;
use thiserror::Error;

/// Errors detected while loading or validating a run configuration.
///
/// All of these are fatal and are raised before any traffic is sent.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("At least one stage is required")]
    NoStages,

    #[error("Stage {index} has a zero duration")]
    ZeroDuration { index: usize },

    #[error("Invalid base URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("`{field}` must be greater than zero (got {value:?})")]
    ZeroTimeout { field: &'static str, value: Duration },

    #[error("`sample_capacity` must be greater than zero")]
    ZeroCapacity,

    #[error("Metric {0:?} is defined more than once")]
    DuplicateMetric(String),

    #[error("Threshold references undefined metric {0:?}")]
    UnknownMetric(String),

    #[error("Threshold {expression:?} cannot be applied to {kind} metric {metric:?}")]
    WrongMetricKind {
        metric: String,
        kind: &'static str,
        expression: String,
    },

    #[error("Invalid threshold expression {expression:?}: {reason}")]
    InvalidThreshold { expression: String, reason: String },
}
