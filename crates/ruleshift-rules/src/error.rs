//! Error types for rule definitions.

use thiserror::Error;

/// Result type alias for rule operations.
pub type RuleResult<T> = Result<T, RuleError>;

/// Errors that can occur while parsing or validating rules.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid quantity {input:?}: {reason}")]
    Quantity { input: String, reason: String },

    #[error("invalid rule {name:?}: {reason}")]
    Invalid { name: String, reason: String },

    #[error("duplicate rule: {0}")]
    Duplicate(String),

    #[error("failed to read rules file: {0}")]
    Read(String),

    #[error("failed to parse rules file: {0}")]
    Parse(String),
}
