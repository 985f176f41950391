//! ruleshift-autoscale — rule-driven replica scaling.
//!
//! Every tick the [`Autoscaler`] snapshots the rule registry, evaluates
//! each rule concurrently against fresh telemetry, combines the per-rule
//! desired replica counts into one priority-weighted target, and writes
//! it to the [`Target`] when it differs from the current replica count.
//!
//! # Evaluation
//!
//! ```text
//! weighted_delta = 0.9 * delta + 0.1 * last_delta
//!
//! rising:  limit = upper_limit
//! falling: limit = lower_limit (or value + 2 * weighted_delta below it)
//!
//! intervals_until_limit = max(|value - limit| / |weighted_delta| - calmdown, 1)
//! increase              = sign * |sign * max_count - latest| / intervals_until_limit
//!
//! window = last five violation counts
//! slope  = (window.last - window.first) / window.len
//!
//! |window.last| >= max_count  =>  fire: pick a policy tier by slope
//! ```
//!
//! # Calmdown
//!
//! After a successful scale the controller enters calmdown and skips rule
//! evaluation until `calmdown_intervals` ticks (counting the scaling tick)
//! have passed.

pub mod consensus;
pub mod controller;
pub mod error;
pub mod evaluation;
pub mod policy;
pub mod source;
pub mod table;
pub mod target;

pub use consensus::aggregate;
pub use controller::{Autoscaler, AutoscalerConfig, Phase, TickOutcome};
pub use error::{ScaleError, ScaleResult};
pub use evaluation::{EvaluationParams, Firing, MetricEvaluation, Observation, evaluate_rule, observe};
pub use policy::{Policy, ScaleAction, proportional_down};
pub use source::{MetricError, MetricResult, MetricSource, Sample};
pub use table::render_table;
pub use target::{ReplicaStatus, Target};
