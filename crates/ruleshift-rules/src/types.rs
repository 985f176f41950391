//! Rule definitions.
//!
//! These types mirror the records delivered by the rule registry. The
//! autoscaler treats them as read-only; all mutable evaluation state is
//! kept separately and keyed by [`Rule::name`].

use serde::{Deserialize, Serialize};

use crate::error::{RuleError, RuleResult};
use crate::quantity::Quantity;

/// Stable identifier of a rule. Evaluation state is keyed by this.
pub type RuleId = String;

/// A scaling rule evaluated against one value metric and one delta metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub name: RuleId,
    /// Namespace the metrics are scoped to.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Metric carrying the absolute level.
    pub value_metric: String,
    /// Metric carrying the externally computed rate of change.
    pub delta_metric: String,
    /// Weight of this rule during consensus. Must be positive.
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub modes: ScalingModes,
    pub limits: Limits,
}

/// Per-direction scaling mode selectors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ScalingModes {
    #[serde(default)]
    pub upscaling: ScalingMode,
    #[serde(default)]
    pub downscaling: ScalingMode,
}

/// Whether a rule may move replicas in a given direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Intensity is chosen from the violation-count slope.
    #[default]
    Auto,
    /// The rule never requests a change in this direction.
    Disabled,
}

/// Thresholds driving the violation count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Limits {
    pub upper_limit: Quantity,
    pub lower_limit: Quantity,
    /// Target usage level for proportional scale-down.
    pub desired_usage: Quantity,
    /// Violation count at which the rule fires.
    pub max_violation_count: f64,
}

/// Top-level layout of a rules file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RulesFile {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_priority() -> u32 {
    1
}

impl Rule {
    /// Check the invariants the evaluation engine relies on.
    pub fn validate(&self) -> RuleResult<()> {
        let invalid = |reason: &str| {
            Err(RuleError::Invalid {
                name: self.name.clone(),
                reason: reason.to_string(),
            })
        };

        if self.name.trim().is_empty() {
            return invalid("name must not be empty");
        }
        if self.value_metric.is_empty() || self.delta_metric.is_empty() {
            return invalid("value_metric and delta_metric are required");
        }
        if self.priority == 0 {
            return invalid("priority must be positive");
        }
        let max = self.limits.max_violation_count;
        if !max.is_finite() || max <= 0.0 {
            return invalid("max_violation_count must be a positive number");
        }
        if self.limits.lower_limit > self.limits.upper_limit {
            return invalid("lower_limit exceeds upper_limit");
        }
        Ok(())
    }
}
