use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a series is reduced to the single number a threshold compares against.
///
/// Latency aggregations are expressed in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Percentile(f64),
    Median,
    Avg,
    Min,
    Max,
    Count,
    Rate,
}

impl Aggregation {
    /// Whether the aggregation reads latency samples, which only trend metrics hold.
    pub fn needs_samples(&self) -> bool {
        !matches!(self, Aggregation::Count | Aggregation::Rate)
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Percentile(p) => write!(f, "p({p})"),
            Aggregation::Median => write!(f, "med"),
            Aggregation::Avg => write!(f, "avg"),
            Aggregation::Min => write!(f, "min"),
            Aggregation::Max => write!(f, "max"),
            Aggregation::Count => write!(f, "count"),
            Aggregation::Rate => write!(f, "rate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    pub fn holds(&self, observed: f64, limit: f64) -> bool {
        match self {
            Comparison::Lt => observed < limit,
            Comparison::Le => observed <= limit,
            Comparison::Gt => observed > limit,
            Comparison::Ge => observed >= limit,
            Comparison::Eq => observed == limit,
            Comparison::Ne => observed != limit,
        }
    }

    fn parse_prefix(s: &str) -> Option<(Self, usize)> {
        // NOTE: Two-character operators must be tried first.
        const OPERATORS: [(&str, Comparison); 6] = [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("==", Comparison::Eq),
            ("!=", Comparison::Ne),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ];

        OPERATORS
            .iter()
            .find(|(op, _)| s.starts_with(op))
            .map(|(op, cmp)| (*cmp, op.len()))
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        };
        f.write_str(op)
    }
}

/// A parsed threshold expression such as `p(95)<300` or `rate<0.02`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub limit: f64,
}

impl ThresholdExpr {
    pub fn holds(&self, observed: f64) -> bool {
        self.comparison.holds(observed, self.limit)
    }
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.aggregation, self.comparison, self.limit)
    }
}

impl FromStr for ThresholdExpr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidThreshold {
            expression: s.to_string(),
            reason: reason.to_string(),
        };

        let compact: String = s.split_whitespace().collect();
        let op_start = compact
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| invalid("missing comparison operator"))?;

        let (lhs, rest) = compact.split_at(op_start);
        let (comparison, op_len) =
            Comparison::parse_prefix(rest).ok_or_else(|| invalid("unknown comparison operator"))?;

        let limit: f64 = rest[op_len..]
            .parse()
            .map_err(|_| invalid("limit is not a number"))?;
        if !limit.is_finite() {
            return Err(invalid("limit must be finite"));
        }

        let aggregation = match lhs {
            "med" => Aggregation::Median,
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "count" => Aggregation::Count,
            "rate" => Aggregation::Rate,
            "" => return Err(invalid("missing aggregation")),
            other => {
                let inner = other
                    .strip_prefix("p(")
                    .and_then(|x| x.strip_suffix(')'))
                    .ok_or_else(|| invalid("unknown aggregation"))?;
                let p: f64 = inner
                    .parse()
                    .map_err(|_| invalid("percentile is not a number"))?;
                if !(0. ..=100.).contains(&p) {
                    return Err(invalid("percentile must be within [0, 100]"));
                }
                Aggregation::Percentile(p)
            }
        };

        Ok(Self {
            aggregation,
            comparison,
            limit,
        })
    }
}

/// Threshold entry as written in a config file.
///
/// Either a bare expression or an object that also opts into aborting the run early.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdSpec {
    Expression(String),
    Detailed {
        threshold: String,
        #[serde(default)]
        abort_on_fail: bool,
    },
}

impl ThresholdSpec {
    pub fn expression(&self) -> &str {
        match self {
            ThresholdSpec::Expression(expr) => expr,
            ThresholdSpec::Detailed { threshold, .. } => threshold,
        }
    }

    pub fn abort_on_fail(&self) -> bool {
        match self {
            ThresholdSpec::Expression(_) => false,
            ThresholdSpec::Detailed { abort_on_fail, .. } => *abort_on_fail,
        }
    }
}

impl From<&str> for ThresholdSpec {
    fn from(expr: &str) -> Self {
        ThresholdSpec::Expression(expr.to_string())
    }
}

/// A validated threshold bound to a defined metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub source: String,
    pub expr: ThresholdExpr,
    pub abort_on_fail: bool,
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.source)
    }
}
