#![doc = include_str!("../README.md")]

pub mod client;
pub mod error;
pub mod evaluator;
pub mod recorder;
pub mod run;
pub mod scheduler;

pub(crate) mod worker;

pub use canary_core;
pub use client::{HttpClient, ReqwestClient};
pub use error::{ClientError, MetricsError, RunError};
pub use evaluator::Evaluator;
pub use recorder::{MetricSeries, Recorder, SeriesSnapshot};
pub use run::{StopHandle, TestRun};
pub use scheduler::{ramp_target, RampScheduler, SchedulerState, StopSummary};

pub mod prelude {
    pub use crate::client::{HttpClient, ReqwestClient};
    pub use crate::error::{ClientError, RunError};
    pub use crate::run::{StopHandle, TestRun};
    pub use canary_core::{
        ConfigError, MetricConfig, RampPolicy, Report, RunConfig, Stage, ThresholdSpec,
    };
}
