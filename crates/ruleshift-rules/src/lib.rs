//! ruleshift-rules — scaling rule definitions and the rule registry.
//!
//! A [`Rule`] names a value metric and a delta metric, a priority used
//! during consensus, and the limits that drive the violation count. Rules
//! live in a shared [`RuleRegistry`] that can be mutated at any time; the
//! autoscaler takes a [`RuleSnapshot`] at the start of every tick.
//!
//! # Rules file
//!
//! ```text
//! [[rules]]
//! name = "queue-depth"
//! namespace = "default"
//! value_metric = "queue_length"
//! delta_metric = "queue_length_delta"
//! priority = 2
//!
//! [rules.limits]
//! upper_limit = "800"
//! lower_limit = "200"
//! desired_usage = "500"
//! max_violation_count = 5.0
//! ```
//!
//! Numeric limits are [`Quantity`] values and accept Kubernetes-style
//! suffixes (`250m`, `1.5k`, `2Gi`, `1e3`).

pub mod error;
pub mod quantity;
pub mod registry;
pub mod types;

pub use error::{RuleError, RuleResult};
pub use quantity::Quantity;
pub use registry::{RuleRegistry, RuleSnapshot, SyncSummary, load_rules_file};
pub use types::*;
