//! Measured backtest metrics and the feasibility filters applied to them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{config_error, BtError, BtResult};

/// Tolerance for the `=` comparator. Scraped report values are floats, so
/// exact equality is meaningless.
const EQ_EPSILON: f64 = 1e-9;

/// The set of metrics measured for one evaluated parameter assignment
/// (e.g. "net_profit", "sharpe_ratio", "max_drawdown").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub metrics: HashMap<String, f64>,
}

impl MetricReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a report from name/value pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            metrics: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Comparison operator used in feasibility filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "=")]
    Eq,
}

impl Comparator {
    /// Apply the comparator to a measured value against a threshold.
    pub fn matches(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gte => value >= threshold,
            Self::Lte => value <= threshold,
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Eq => (value - threshold).abs() <= EQ_EPSILON,
        }
    }
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Eq => "=",
        };
        write!(f, "{s}")
    }
}

/// A single feasibility constraint on a measured metric.
///
/// An observation is feasible iff every configured filter passes. A filter
/// referencing a metric the evaluator did not report fails (the report
/// layout is only known at runtime, so this is a per-observation outcome,
/// not a configuration error).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub metric: String,
    pub comparator: Comparator,
    pub threshold: f64,
}

impl Filter {
    pub fn new(metric: impl Into<String>, comparator: Comparator, threshold: f64) -> Self {
        Self {
            metric: metric.into(),
            comparator,
            threshold,
        }
    }

    /// Check the filter definition itself (not a measurement).
    pub fn validate(&self) -> BtResult<()> {
        if self.metric.trim().is_empty() {
            return Err(config_error!("filter references an empty metric name"));
        }
        if !self.threshold.is_finite() {
            return Err(config_error!(
                "filter on '{}' has non-finite threshold {}",
                self.metric,
                self.threshold
            ));
        }
        Ok(())
    }

    pub fn passes(&self, report: &MetricReport) -> bool {
        match report.get(&self.metric) {
            Some(value) => self.comparator.matches(value, self.threshold),
            None => false,
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.metric, self.comparator, self.threshold)
    }
}

/// True iff all filters pass against the report.
pub fn feasible(filters: &[Filter], report: &MetricReport) -> bool {
    filters.iter().all(|f| f.passes(report))
}

/// Validate a filter set as configuration, before any session starts.
pub fn validate_filters(filters: &[Filter]) -> BtResult<()> {
    for filter in filters {
        filter.validate()?;
    }
    Ok(())
}
