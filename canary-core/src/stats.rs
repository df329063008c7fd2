use crate::MetricKind;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Latency aggregates of a trend series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    #[serde(with = "humantime_serde")]
    pub min: Duration,
    #[serde(with = "humantime_serde")]
    pub avg: Duration,
    #[serde(with = "humantime_serde")]
    pub med: Duration,
    #[serde(with = "humantime_serde")]
    pub p90: Duration,
    #[serde(with = "humantime_serde")]
    pub p95: Duration,
    #[serde(with = "humantime_serde")]
    pub p99: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub name: String,
    pub kind: MetricKind,
    pub count: u64,
    pub failures: u64,
    /// `None` when the series is empty.
    pub rate: Option<f64>,
    /// `None` for rate series and for empty trend series.
    pub latency: Option<LatencySummary>,
}

impl fmt::Display for MetricSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: count={}", self.name, self.count)?;
        match self.rate {
            Some(rate) => write!(f, ", rate={:.2}%", rate * 100.)?,
            None => write!(f, ", rate=n/a")?,
        }
        if let Some(latency) = &self.latency {
            write!(
                f,
                ", min={:?}, avg={:?}, med={:?}, p90={:?}, p95={:?}, p99={:?}, max={:?}",
                latency.min,
                latency.avg,
                latency.med,
                latency.p90,
                latency.p95,
                latency.p99,
                latency.max,
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    /// The aggregated value the expression was compared against; `None` without data.
    pub observed: Option<f64>,
    pub passed: bool,
    pub abort_on_fail: bool,
    /// Why the threshold could not be computed, if it could not.
    pub note: Option<String>,
}

impl fmt::Display for ThresholdResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { '✓' } else { '✗' };
        write!(f, "{mark} {}: {}", self.metric, self.expression)?;
        match (self.observed, &self.note) {
            (Some(observed), _) => write!(f, " (observed {observed:.3})"),
            (None, Some(note)) => write!(f, " ({note})"),
            (None, None) => Ok(()),
        }
    }
}

/// Final outcome of a run, handed to the report sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub passed: bool,
    /// Set when an `abort_on_fail` threshold ended the run early.
    pub aborted: bool,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub requests: u64,
    pub thresholds: Vec<ThresholdResult>,
    pub metrics: Vec<MetricSummary>,
}

impl Report {
    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds.iter().filter(|t| !t.passed)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} requests in {}",
            self.requests,
            humantime::format_duration(round_to_millis(self.elapsed))
        )?;
        for metric in &self.metrics {
            writeln!(f, "  {metric}")?;
        }

        if !self.thresholds.is_empty() {
            writeln!(f, "thresholds:")?;
            for threshold in &self.thresholds {
                writeln!(f, "  {threshold}")?;
            }
        }

        if self.aborted {
            writeln!(f, "run aborted early by a failing threshold")?;
        }
        write!(f, "verdict: {}", if self.passed { "PASS" } else { "FAIL" })
    }
}

fn round_to_millis(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}
