//! Operator-facing overview of per-rule evaluation state.

use std::collections::HashMap;
use std::fmt::Write;

use ruleshift_rules::{RuleId, RuleSnapshot};

use crate::evaluation::MetricEvaluation;

const HEADERS: [&str; 5] = ["RULE", "PRIORITY", "ANOMALY", "VIOLATION COUNT", "DESIRED"];

/// Render a plain-text table of every tracked rule, ordered by name.
///
/// Returns an empty string when nothing is tracked.
pub fn render_table(
    evaluations: &HashMap<RuleId, MetricEvaluation>,
    rules: &RuleSnapshot,
) -> String {
    let rows: Vec<[String; 5]> = rules
        .iter()
        .filter_map(|(id, rule)| {
            let evaluation = evaluations.get(id)?;
            let window = evaluation
                .window()
                .iter()
                .map(|count| format!("{count:.2}"))
                .collect::<Vec<_>>()
                .join(", ");
            Some([
                id.clone(),
                rule.priority.to_string(),
                evaluation.is_anomalous().to_string(),
                format!("[{window}]"),
                format!("{:.2}", evaluation.desired_replicas()),
            ])
        })
        .collect();

    if rows.is_empty() {
        return String::new();
    }

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let headers = HEADERS.map(str::to_string);
    for row in std::iter::once(&headers).chain(&rows) {
        let line = row
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ");
        let _ = writeln!(out, "{}", line.trim_end());
    }
    out
}
