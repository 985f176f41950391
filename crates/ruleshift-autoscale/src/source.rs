//! Metric source seam.
//!
//! The engine consumes two metrics per rule: a value metric (absolute
//! level) and a delta metric (externally computed rate of change). A
//! source returns the most recent samples for a metric within a scope;
//! the engine uses the first one.

use std::future::Future;

use chrono::{DateTime, Utc};
use ruleshift_rules::Quantity;
use thiserror::Error;

/// A single timestamped metric reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: Quantity,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: Quantity) -> Self {
        Self { timestamp, value }
    }
}

/// Per-call metric failures. These only ever skip the affected rule.
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("failed to fetch metric {metric}: {reason}")]
    Fetch { metric: String, reason: String },

    #[error("metric {0} returned no samples")]
    Empty(String),

    #[error("failed to parse metric {metric}: {reason}")]
    Parse { metric: String, reason: String },
}

pub type MetricResult<T> = Result<T, MetricError>;

/// Source of live telemetry.
pub trait MetricSource: Send + Sync + 'static {
    /// Fetch the most recent samples of `metric` in `scope`, newest first.
    fn fetch(
        &self,
        metric: &str,
        scope: &str,
    ) -> impl Future<Output = MetricResult<Vec<Sample>>> + Send;
}

/// Fetch a metric and take its first sample.
pub async fn fetch_first<M: MetricSource>(
    source: &M,
    metric: &str,
    scope: &str,
) -> MetricResult<Quantity> {
    source
        .fetch(metric, scope)
        .await?
        .first()
        .map(|sample| sample.value)
        .ok_or_else(|| MetricError::Empty(metric.to_string()))
}
