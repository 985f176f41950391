//! Per-rule evaluation engine.
//!
//! Each rule owns a [`MetricEvaluation`] that persists across ticks. A tick
//! folds one value/delta observation into it: the delta is smoothed, the
//! violation count grows in proportion to how quickly the value approaches
//! its limit, and once the count reaches the rule's threshold the rule
//! fires and records a new desired replica count.
//!
//! All quantities are in milli-units.

use std::collections::VecDeque;

use ruleshift_rules::{Rule, ScalingMode};
use tracing::{debug, info, warn};

use crate::policy::ScaleAction;
use crate::source::{MetricResult, MetricSource, fetch_first};

/// Number of violation counts kept in the sliding window.
pub const WINDOW_CAPACITY: usize = 5;

/// A delta larger than this multiple of the running average is an anomaly.
const ANOMALY_FACTOR: f64 = 10.0;

/// Exponential smoothing weights: fresh delta vs. previous smoothed delta.
const FRESH_WEIGHT: f64 = 0.9;
const HISTORY_WEIGHT: f64 = 0.1;

/// Share of the previous increase carried over when the delta is flat.
const DECAY: f64 = 0.5;

/// Controller parameters the engine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationParams {
    pub calmdown_intervals: u32,
    pub min_replicas: u32,
    pub max_replicas: u32,
}

impl EvaluationParams {
    fn clamp(&self, replicas: f64) -> f64 {
        replicas
            .max(f64::from(self.min_replicas))
            .min(f64::from(self.max_replicas))
    }
}

/// One value/delta reading for a rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub value: f64,
    pub delta: f64,
}

/// Result of a rule reaching its violation threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Firing {
    pub action: ScaleAction,
    pub slope: f64,
    pub desired_replicas: f64,
}

/// Persistent evaluation state of a single rule.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEvaluation {
    /// Most recent violation counts, oldest first. Never empty.
    window: VecDeque<f64>,
    /// Last smoothed delta.
    last_delta: f64,
    /// Running mean of the absolute delta.
    avg_delta: f64,
    iterations: u64,
    /// Last computed target; rounded only during consensus.
    desired_replicas: f64,
    /// Set when the latest delta was a spike; suppresses growth this tick.
    anomaly: bool,
    /// Violation-count increase of the previous tick.
    previous_increase: f64,
}

impl MetricEvaluation {
    /// Fresh state for a rule seen for the first time.
    pub fn new(current_replicas: u32, delta: f64) -> Self {
        Self {
            window: VecDeque::from([0.0]),
            last_delta: delta,
            avg_delta: delta.abs(),
            iterations: 1,
            desired_replicas: f64::from(current_replicas),
            anomaly: false,
            previous_increase: 0.0,
        }
    }

    pub fn window(&self) -> &VecDeque<f64> {
        &self.window
    }

    pub fn last_delta(&self) -> f64 {
        self.last_delta
    }

    pub fn avg_delta(&self) -> f64 {
        self.avg_delta
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn desired_replicas(&self) -> f64 {
        self.desired_replicas
    }

    pub fn is_anomalous(&self) -> bool {
        self.anomaly
    }

    /// Latest violation count.
    pub fn latest(&self) -> f64 {
        self.window.back().copied().unwrap_or(0.0)
    }

    /// Rate of change of the violation count across the window.
    pub fn slope(&self) -> f64 {
        let first = self.window.front().copied().unwrap_or(0.0);
        (self.latest() - first) / self.window.len() as f64
    }

    /// Fold an observation into an existing record.
    pub fn record(
        &mut self,
        rule: &Rule,
        observation: Observation,
        current_replicas: u32,
        params: &EvaluationParams,
    ) -> Option<Firing> {
        self.iterations += 1;

        // Compared against the average of the samples seen so far.
        let magnitude = observation.delta.abs();
        self.anomaly = magnitude > ANOMALY_FACTOR * self.avg_delta;
        if self.anomaly {
            debug!(
                rule = %rule.name,
                delta = observation.delta,
                avg_delta = self.avg_delta,
                "delta looks anomalous"
            );
        }
        self.avg_delta += (magnitude - self.avg_delta) / self.iterations as f64;

        self.advance(rule, observation, current_replicas, params)
    }

    /// Smooth the delta, update the violation window, and fire if the
    /// threshold is reached.
    fn advance(
        &mut self,
        rule: &Rule,
        observation: Observation,
        current_replicas: u32,
        params: &EvaluationParams,
    ) -> Option<Firing> {
        let limits = &rule.limits;
        // Whole milli-units, so a flat delta settles at exactly zero.
        let weighted = (FRESH_WEIGHT * observation.delta + HISTORY_WEIGHT * self.last_delta).round();
        self.last_delta = weighted;

        let latest = self.latest();
        let (increase, count) = if weighted == 0.0 {
            let increase = self.previous_increase * DECAY;
            (increase, latest + increase)
        } else {
            let factor = weighted.signum();
            let value = observation.value;
            let lower = limits.lower_limit.as_milli_f64();
            let limit = if weighted > 0.0 {
                limits.upper_limit.as_milli_f64()
            } else if value < lower {
                // Already below the lower limit: project a short horizon.
                value + 2.0 * weighted
            } else {
                lower
            };

            let diff_to_limit = (value - limit).abs();
            let intervals_until_limit = (diff_to_limit / weighted.abs()
                - f64::from(params.calmdown_intervals))
            .max(1.0);
            let remaining = (factor * limits.max_violation_count - latest).abs();
            let increase = factor * remaining / intervals_until_limit;

            debug!(
                rule = %rule.name,
                diff_to_limit,
                intervals_until_limit,
                remaining,
                increase,
                "violation count step"
            );

            if self.anomaly {
                debug!(rule = %rule.name, "anomaly, holding violation count");
                (increase, latest)
            } else {
                (increase, latest + increase)
            }
        };

        self.previous_increase = increase;
        self.push(count);

        let slope = self.slope();
        debug!(rule = %rule.name, slope, count, "count slope");

        if self.latest().abs() < limits.max_violation_count {
            return None;
        }

        let action = match ScaleAction::for_slope(slope) {
            ScaleAction::Up(_) if rule.modes.upscaling == ScalingMode::Disabled => ScaleAction::Hold,
            ScaleAction::ProportionalDown if rule.modes.downscaling == ScalingMode::Disabled => {
                ScaleAction::Hold
            }
            action => action,
        };
        let desired_replicas = params.clamp(action.apply(current_replicas, limits));

        self.desired_replicas = desired_replicas;
        self.window.clear();
        self.window.push_back(0.0);

        Some(Firing {
            action,
            slope,
            desired_replicas,
        })
    }

    fn push(&mut self, count: f64) {
        if self.window.len() == WINDOW_CAPACITY {
            self.window.pop_front();
        }
        self.window.push_back(count);
    }

    #[cfg(test)]
    pub(crate) fn with_window(mut self, counts: &[f64]) -> Self {
        self.window = counts.iter().copied().collect();
        self
    }
}

/// Apply one observation to a rule's state, creating it on first sight.
pub fn observe(
    evaluation: Option<MetricEvaluation>,
    rule: &Rule,
    observation: Observation,
    current_replicas: u32,
    params: &EvaluationParams,
) -> (MetricEvaluation, Option<Firing>) {
    match evaluation {
        Some(mut evaluation) => {
            let firing = evaluation.record(rule, observation, current_replicas, params);
            (evaluation, firing)
        }
        None => {
            debug!(rule = %rule.name, "initializing evaluation state");
            let mut evaluation = MetricEvaluation::new(current_replicas, observation.delta);
            let firing = evaluation.advance(rule, observation, current_replicas, params);
            (evaluation, firing)
        }
    }
}

/// Fetch fresh metrics for `rule` and fold them into its state.
///
/// Metric failures are logged and leave the state untouched; the returned
/// value is the state to keep for the next tick.
pub async fn evaluate_rule<M: MetricSource>(
    source: &M,
    rule: &Rule,
    evaluation: Option<MetricEvaluation>,
    current_replicas: u32,
    params: &EvaluationParams,
) -> Option<MetricEvaluation> {
    debug!(rule = %rule.name, "evaluating rule");

    let observation = match fetch_observation(source, rule).await {
        Ok(observation) => observation,
        Err(e) => {
            warn!(rule = %rule.name, error = %e, "could not retrieve metrics for rule");
            return evaluation;
        }
    };

    let (evaluation, firing) = observe(evaluation, rule, observation, current_replicas, params);
    if let Some(firing) = firing {
        info!(
            rule = %rule.name,
            action = %firing.action,
            slope = firing.slope,
            desired = firing.desired_replicas,
            "rule fired"
        );
    }
    Some(evaluation)
}

async fn fetch_observation<M: MetricSource>(source: &M, rule: &Rule) -> MetricResult<Observation> {
    let (value, delta) = tokio::try_join!(
        fetch_first(source, &rule.value_metric, &rule.namespace),
        fetch_first(source, &rule.delta_metric, &rule.namespace),
    )?;
    Ok(Observation {
        value: value.as_milli_f64(),
        delta: delta.as_milli_f64(),
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use ruleshift_rules::{Limits, Quantity, Rule, ScalingModes};

    use crate::source::{MetricError, MetricResult, MetricSource, Sample};

    /// Rule with limits 20..80 units and desired usage 50.
    pub fn rule(name: &str, max_violation_count: f64) -> Rule {
        Rule {
            name: name.to_string(),
            namespace: "default".to_string(),
            value_metric: format!("{name}_value"),
            delta_metric: format!("{name}_delta"),
            priority: 1,
            modes: ScalingModes::default(),
            limits: Limits {
                upper_limit: Quantity::from_units(80),
                lower_limit: Quantity::from_units(20),
                desired_usage: Quantity::from_units(50),
                max_violation_count,
            },
        }
    }

    /// In-memory metric source keyed by metric name.
    #[derive(Default)]
    pub struct StaticSource {
        values: Mutex<HashMap<String, Vec<Sample>>>,
        fetches: AtomicUsize,
    }

    impl StaticSource {
        pub fn set(&self, metric: &str, milli: i64) {
            self.values.lock().unwrap().insert(
                metric.to_string(),
                vec![Sample::new(Utc::now(), Quantity::from_milli(milli))],
            );
        }

        pub fn clear(&self, metric: &str) {
            self.values.lock().unwrap().insert(metric.to_string(), Vec::new());
        }

        pub fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl MetricSource for StaticSource {
        async fn fetch(&self, metric: &str, _scope: &str) -> MetricResult<Vec<Sample>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.values
                .lock()
                .unwrap()
                .get(metric)
                .cloned()
                .ok_or_else(|| MetricError::Fetch {
                    metric: metric.to_string(),
                    reason: "not found".to_string(),
                })
        }
    }
}
