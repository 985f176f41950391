//! Priority-weighted consensus across rules.

use std::collections::HashMap;

use ruleshift_rules::{RuleId, RuleSnapshot};

use crate::error::{ScaleError, ScaleResult};
use crate::evaluation::MetricEvaluation;

/// Combine the desired replica counts of all tracked rules.
///
/// `round(Σ desired_i * priority_i / Σ priority_i)` over every rule that
/// has evaluation state and is still present in `rules`. Rules that did
/// not fire this tick contribute their last known desired count.
pub fn aggregate(
    evaluations: &HashMap<RuleId, MetricEvaluation>,
    rules: &RuleSnapshot,
) -> ScaleResult<u32> {
    let mut tracked = 0usize;
    let mut weights: u64 = 0;
    let mut weighted_replicas = 0.0;

    for (id, evaluation) in evaluations {
        let Some(rule) = rules.get(id) else {
            continue;
        };
        tracked += 1;
        weights += u64::from(rule.priority);
        weighted_replicas += evaluation.desired_replicas() * f64::from(rule.priority);
    }

    if tracked == 0 {
        return Err(ScaleError::ConsensusUndefined("no rules tracked".to_string()));
    }
    if weights == 0 {
        return Err(ScaleError::ConsensusUndefined(
            "sum of rule priorities is zero".to_string(),
        ));
    }

    Ok((weighted_replicas / weights as f64).round().max(0.0) as u32)
}
