use crate::{
    ConfigError, Threshold, ThresholdExpr, ThresholdSpec, DEFAULT_BASE_URL, DEFAULT_GRACE_PERIOD,
    DEFAULT_PACING, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SAMPLE_CAPACITY, DEFAULT_TICK_INTERVAL,
    ERRORS, HTTP_REQ_DURATION, HTTP_REQ_FAILED, LATENCY_P95_MS,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// One window of the ramp: the scheduler moves towards `target` live workers over `duration`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// How desired concurrency evolves within a stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RampPolicy {
    /// Interpolate from the previous stage's target (0 before the first stage) to this stage's
    /// target over the stage duration.
    #[default]
    Linear,
    /// Hold this stage's target for the whole stage.
    Step,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Latency samples plus exact failure counters.
    Trend,
    /// Exact failure counters only.
    Rate,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Trend => "trend",
            MetricKind::Rate => "rate",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    pub kind: MetricKind,
}

impl MetricConfig {
    pub fn trend(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: MetricKind::Trend,
        }
    }

    pub fn rate(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: MetricKind::Rate,
        }
    }
}

/// Complete description of a canary run.
///
/// `RunConfig::default()` reproduces the canary smoke profile: a five minute ramp to 100
/// virtual users, 100ms pacing, and the `p(95)<300` / `rate<0.02` thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub base_url: String,
    pub stages: Vec<Stage>,
    pub ramp: RampPolicy,
    #[serde(with = "humantime_serde")]
    pub pacing: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
    pub sample_capacity: usize,
    pub metrics: Vec<MetricConfig>,
    pub thresholds: BTreeMap<String, Vec<ThresholdSpec>>,
}

impl Default for RunConfig {
    fn default() -> Self {
        let mut thresholds: BTreeMap<String, Vec<ThresholdSpec>> = BTreeMap::new();
        thresholds.insert(HTTP_REQ_DURATION.to_string(), vec!["p(95)<300".into()]);
        thresholds.insert(HTTP_REQ_FAILED.to_string(), vec!["rate<0.02".into()]);

        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            stages: vec![
                Stage::new(Duration::from_secs(60), 10),
                Stage::new(Duration::from_secs(120), 50),
                Stage::new(Duration::from_secs(120), 100),
            ],
            ramp: RampPolicy::default(),
            pacing: DEFAULT_PACING,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            tick_interval: DEFAULT_TICK_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
            sample_capacity: DEFAULT_SAMPLE_CAPACITY,
            metrics: vec![
                MetricConfig::trend(HTTP_REQ_DURATION),
                MetricConfig::rate(HTTP_REQ_FAILED),
                MetricConfig::trend(LATENCY_P95_MS),
                MetricConfig::rate(ERRORS),
            ],
            thresholds,
        }
    }
}

impl RunConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_ramp(mut self, ramp: RampPolicy) -> Self {
        self.ramp = ramp;
        self
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<MetricConfig>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replace every threshold with the given `(metric, spec)` pairs.
    pub fn with_thresholds<I, S>(mut self, thresholds: I) -> Self
    where
        I: IntoIterator<Item = (S, ThresholdSpec)>,
        S: Into<String>,
    {
        self.thresholds.clear();
        for (metric, spec) in thresholds {
            self.thresholds.entry(metric.into()).or_default().push(spec);
        }
        self
    }

    pub fn max_target(&self) -> usize {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    pub fn metric_kind(&self, name: &str) -> Option<MetricKind> {
        self.metrics.iter().find(|m| m.name == name).map(|m| m.kind)
    }

    /// Check everything that can be checked before traffic is sent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_stages(&self.stages)?;
        validate_url(&self.base_url)?;

        for (field, value) in [
            ("request_timeout", self.request_timeout),
            ("tick_interval", self.tick_interval),
            ("grace_period", self.grace_period),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroTimeout { field, value });
            }
        }

        if self.sample_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        let mut seen = HashSet::new();
        for metric in &self.metrics {
            if !seen.insert(metric.name.as_str()) {
                return Err(ConfigError::DuplicateMetric(metric.name.clone()));
            }
        }

        self.thresholds().map(|_| ())
    }

    /// Parse and bind every threshold to its metric.
    ///
    /// Metric names are checked eagerly: a threshold on an undefined metric is a
    /// [`ConfigError::UnknownMetric`] rather than a failure discovered at the end of the run.
    pub fn thresholds(&self) -> Result<Vec<Threshold>, ConfigError> {
        let mut out = vec![];
        for (metric, specs) in &self.thresholds {
            let kind = self
                .metric_kind(metric)
                .ok_or_else(|| ConfigError::UnknownMetric(metric.clone()))?;

            for spec in specs {
                let expr: ThresholdExpr = spec.expression().parse()?;
                if kind == MetricKind::Rate && expr.aggregation.needs_samples() {
                    return Err(ConfigError::WrongMetricKind {
                        metric: metric.clone(),
                        kind: kind.as_str(),
                        expression: spec.expression().to_string(),
                    });
                }

                out.push(Threshold {
                    metric: metric.clone(),
                    source: spec.expression().trim().to_string(),
                    expr,
                    abort_on_fail: spec.abort_on_fail(),
                });
            }
        }
        Ok(out)
    }
}

/// A stage list must be non-empty and every stage must last for some time.
pub fn validate_stages(stages: &[Stage]) -> Result<(), ConfigError> {
    if stages.is_empty() {
        return Err(ConfigError::NoStages);
    }
    if let Some(index) = stages.iter().position(|s| s.duration.is_zero()) {
        return Err(ConfigError::ZeroDuration { index });
    }
    Ok(())
}

fn validate_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let url = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("unsupported scheme {other:?}"))),
    }
}
