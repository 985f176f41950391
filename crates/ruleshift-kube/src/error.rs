//! Errors talking to the API server.

use ruleshift_rules::RuleError;
use thiserror::Error;

pub type KubeResult<T> = Result<T, KubeError>;

#[derive(Debug, Error)]
pub enum KubeError {
    #[error("kubernetes api error: {0}")]
    Api(#[from] kube::Error),

    #[error("unsupported workload kind: {0}")]
    UnsupportedKind(String),

    #[error("autoscaling rule {name}: {source}")]
    InvalidRule {
        name: String,
        #[source]
        source: RuleError,
    },
}
