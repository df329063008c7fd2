//! Thread-safe accumulation of request outcomes into named series.
//!
//! Every series keeps exact `total`/`failures` counters. Trend series additionally hold latency
//! samples, bounded by a capacity: once full, new samples go through reservoir sampling
//! (Algorithm R), so the held set remains a uniform sample of everything seen and percentiles stay
//! unbiased while memory stays flat. Rates are always exact since counters are never evicted.
//!
//! Percentiles use the nearest-rank method on the sorted held samples.
use crate::error::MetricsError;
use canary_core::{
    Aggregation, LatencySummary, MetricConfig, MetricKind, MetricSummary, RequestOutcome,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, trace, warn};

pub struct Recorder {
    series: Vec<MetricSeries>,
    index: HashMap<String, usize>,
    recorded: AtomicU64,
}

impl Recorder {
    pub fn new(metrics: &[MetricConfig], capacity: usize) -> Self {
        let series: Vec<_> = metrics
            .iter()
            .map(|m| MetricSeries::new(&m.name, m.kind, capacity))
            .collect();
        let index = series
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.name.clone(), idx))
            .collect();

        Self {
            series,
            index,
            recorded: AtomicU64::new(0),
        }
    }

    pub fn series(&self, name: &str) -> Result<&MetricSeries, MetricsError> {
        self.index
            .get(name)
            .map(|idx| &self.series[*idx])
            .ok_or_else(|| MetricsError::UnknownMetric(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.iter().map(|s| s.name.as_str())
    }

    /// Append one outcome to a single series.
    pub fn record(&self, name: &str, outcome: &RequestOutcome) -> Result<(), MetricsError> {
        self.series(name)?.push(outcome)
    }

    /// Append one outcome to every series. This is what workers call once per request.
    pub fn record_all(&self, outcome: &RequestOutcome) -> Result<(), MetricsError> {
        for series in &self.series {
            series.push(outcome)?;
        }
        self.recorded.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        emit_metrics(outcome);

        Ok(())
    }

    /// Number of outcomes passed to [`Recorder::record_all`].
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, name: &str) -> Result<SeriesSnapshot, MetricsError> {
        self.series(name)?.snapshot()
    }

    pub fn percentile(&self, name: &str, p: f64) -> Result<Duration, MetricsError> {
        self.snapshot(name)?.percentile(p)
    }

    pub fn rate(&self, name: &str) -> Result<f64, MetricsError> {
        self.snapshot(name)?.rate()
    }

    pub fn count(&self, name: &str) -> Result<u64, MetricsError> {
        Ok(self.snapshot(name)?.total)
    }

    pub fn summary(&self, name: &str) -> Result<MetricSummary, MetricsError> {
        Ok(self.snapshot(name)?.summary())
    }

    /// Summaries of every series, in configuration order.
    pub fn summaries(&self) -> Result<Vec<MetricSummary>, MetricsError> {
        self.series
            .iter()
            .map(|s| s.snapshot().map(|snap| snap.summary()))
            .collect()
    }
}

#[cfg(feature = "metrics")]
fn emit_metrics(outcome: &RequestOutcome) {
    let label = if outcome.success { "success" } else { "failure" };
    metrics::counter!("canary_requests_total", "outcome" => label).increment(1);
    metrics::histogram!("canary_request_latency_seconds").record(outcome.latency.as_secs_f64());
}

pub struct MetricSeries {
    name: String,
    kind: MetricKind,
    capacity: usize,
    data: Mutex<SeriesData>,
}

struct SeriesData {
    total: u64,
    failures: u64,
    samples: Vec<Duration>,
    rng: SmallRng,
}

impl MetricSeries {
    pub fn new(name: &str, kind: MetricKind, capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            kind,
            capacity,
            data: Mutex::new(SeriesData {
                total: 0,
                failures: 0,
                samples: vec![],
                rng: SmallRng::from_entropy(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    fn push(&self, outcome: &RequestOutcome) -> Result<(), MetricsError> {
        let mut data = self.data.lock()?;
        data.total += 1;
        if !outcome.success {
            data.failures += 1;
        }

        if self.kind == MetricKind::Trend {
            if data.samples.len() < self.capacity {
                data.samples.push(outcome.latency);
            } else {
                // NOTE: `total` counts every latency this series has seen, including this one.
                let seen = data.total;
                let slot = data.rng.gen_range(0..seen) as usize;
                if slot < self.capacity {
                    data.samples[slot] = outcome.latency;
                }
            }
        }

        Ok(())
    }

    /// Copy the current state under the lock, so every aggregation computed from the snapshot
    /// observes the same sample set.
    pub fn snapshot(&self) -> Result<SeriesSnapshot, MetricsError> {
        let (total, failures, mut samples) = {
            let data = self.data.lock()?;
            (data.total, data.failures, data.samples.clone())
        };
        samples.sort_unstable();

        Ok(SeriesSnapshot {
            name: self.name.clone(),
            kind: self.kind,
            total,
            failures,
            samples,
        })
    }
}

/// A consistent, sorted copy of a series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub name: String,
    pub kind: MetricKind,
    pub total: u64,
    pub failures: u64,
    samples: Vec<Duration>,
}

impl SeriesSnapshot {
    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }

    /// Fraction of outcomes that failed.
    pub fn rate(&self) -> Result<f64, MetricsError> {
        if self.total == 0 {
            return Err(self.no_data());
        }
        Ok(self.failures as f64 / self.total as f64)
    }

    /// Nearest-rank percentile: the sample at rank `ceil(p / 100 * n)`, clamped to `[1, n]`.
    pub fn percentile(&self, p: f64) -> Result<Duration, MetricsError> {
        if !(0. ..=100.).contains(&p) {
            return Err(MetricsError::InvalidPercentile(p));
        }
        let samples = self.latency_samples()?;

        let n = samples.len();
        let rank = ((p * n as f64) / 100.).ceil() as usize;
        let rank = rank.clamp(1, n);
        Ok(samples[rank - 1])
    }

    pub fn min(&self) -> Result<Duration, MetricsError> {
        Ok(self.latency_samples()?[0])
    }

    pub fn max(&self) -> Result<Duration, MetricsError> {
        let samples = self.latency_samples()?;
        Ok(samples[samples.len() - 1])
    }

    pub fn mean(&self) -> Result<Duration, MetricsError> {
        let samples = self.latency_samples()?;
        let sum: Duration = samples.iter().sum();
        Ok(sum / samples.len() as u32)
    }

    /// Reduce the snapshot for a threshold. Latency aggregations are in milliseconds.
    pub fn aggregate(&self, aggregation: Aggregation) -> Result<f64, MetricsError> {
        let millis = |d: Duration| d.as_nanos() as f64 / 1e6;
        match aggregation {
            Aggregation::Count => {
                if self.total == 0 {
                    Err(self.no_data())
                } else {
                    Ok(self.total as f64)
                }
            }
            Aggregation::Rate => self.rate(),
            Aggregation::Percentile(p) => self.percentile(p).map(millis),
            Aggregation::Median => self.percentile(50.).map(millis),
            Aggregation::Avg => self.mean().map(millis),
            Aggregation::Min => self.min().map(millis),
            Aggregation::Max => self.max().map(millis),
        }
    }

    pub fn summary(&self) -> MetricSummary {
        let latency = if self.kind == MetricKind::Trend && !self.samples.is_empty() {
            self.latency_summary().ok()
        } else {
            None
        };

        MetricSummary {
            name: self.name.clone(),
            kind: self.kind,
            count: self.total,
            failures: self.failures,
            rate: self.rate().ok(),
            latency,
        }
    }

    fn latency_summary(&self) -> Result<LatencySummary, MetricsError> {
        Ok(LatencySummary {
            min: self.min()?,
            avg: self.mean()?,
            med: self.percentile(50.)?,
            p90: self.percentile(90.)?,
            p95: self.percentile(95.)?,
            p99: self.percentile(99.)?,
            max: self.max()?,
        })
    }

    fn latency_samples(&self) -> Result<&[Duration], MetricsError> {
        if self.kind != MetricKind::Trend {
            return Err(MetricsError::WrongKind {
                name: self.name.clone(),
                kind: self.kind.as_str(),
            });
        }
        if self.samples.is_empty() {
            return Err(self.no_data());
        }
        Ok(&self.samples)
    }

    fn no_data(&self) -> MetricsError {
        MetricsError::NoData(self.name.clone())
    }
}
