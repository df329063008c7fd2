use crate::error::MetricsError;
use crate::recorder::{Recorder, SeriesSnapshot};
use canary_core::{ConfigError, RunConfig, Threshold, ThresholdResult};
use std::collections::HashMap;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Checks recorded series against the configured thresholds.
#[derive(Debug, Clone)]
pub struct Evaluator {
    thresholds: Vec<Threshold>,
}

impl Evaluator {
    /// Parses every threshold up front; unknown metrics and malformed expressions fail here.
    pub fn new(config: &RunConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            thresholds: config.thresholds()?,
        })
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    pub fn has_abort_thresholds(&self) -> bool {
        self.thresholds.iter().any(|t| t.abort_on_fail)
    }

    /// Evaluate every threshold, ordered by metric name and then as listed.
    ///
    /// A threshold whose metric has no data fails with a "no data" note.
    pub fn evaluate(&self, recorder: &Recorder) -> Vec<ThresholdResult> {
        let mut snapshots = HashMap::new();
        self.thresholds
            .iter()
            .map(|threshold| {
                let snapshot = snapshots
                    .entry(threshold.metric.as_str())
                    .or_insert_with(|| recorder.snapshot(&threshold.metric));
                check(threshold, snapshot.as_ref())
            })
            .collect()
    }

    /// All thresholds hold.
    pub fn verdict(results: &[ThresholdResult]) -> bool {
        results.iter().all(|r| r.passed)
    }

    /// First `abort_on_fail` threshold that currently fails.
    ///
    /// Thresholds without data yet are skipped so a run is not aborted before its first response.
    pub fn check_aborts(&self, recorder: &Recorder) -> Option<ThresholdResult> {
        self.thresholds
            .iter()
            .filter(|t| t.abort_on_fail)
            .map(|t| check(t, recorder.snapshot(&t.metric).as_ref()))
            .find(|r| !r.passed && r.observed.is_some())
    }
}

fn check(
    threshold: &Threshold,
    snapshot: Result<&SeriesSnapshot, &MetricsError>,
) -> ThresholdResult {
    let observed = snapshot
        .map_err(Clone::clone)
        .and_then(|s| s.aggregate(threshold.expr.aggregation));

    let (observed, passed, note) = match observed {
        Ok(value) => (Some(value), threshold.expr.holds(value), None),
        Err(MetricsError::NoData(_)) => (None, false, Some("no data".to_string())),
        Err(err) => {
            warn!("Threshold {threshold} could not be evaluated: {err}");
            (None, false, Some(err.to_string()))
        }
    };

    trace!("{threshold}: observed {observed:?}, passed {passed}");

    ThresholdResult {
        metric: threshold.metric.clone(),
        expression: threshold.source.clone(),
        observed,
        passed,
        abort_on_fail: threshold.abort_on_fail,
        note,
    }
}
