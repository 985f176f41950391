//! ruleshift-kube — Kubernetes API adapters for the autoscaler.
//!
//! Built on a [`kube::Client`], which picks up the in-cluster service
//! account or the local kubeconfig.
//!
//! # Architecture
//!
//! ```text
//! kube::Client
//!   ├── CustomMetricsSource → MetricSource
//!   │     GET /apis/custom.metrics.k8s.io/v1beta1/namespaces/{ns}/services/*/{metric}
//!   ├── ScaleTarget → Target
//!   │     GET   Deployment / StatefulSet status
//!   │     PATCH .../{name}/scale
//!   └── watch_rules → RuleRegistry
//!         AutoscalingRule (ruleshift.dev/v1) applied / deleted
//! ```

pub mod error;
pub mod metrics;
pub mod rules;
pub mod scale;

#[cfg(test)]
mod mock;

pub use error::{KubeError, KubeResult};
pub use metrics::CustomMetricsSource;
pub use rules::{AutoscalingRule, AutoscalingRuleSpec, RuleEvents, watch_rules};
pub use scale::{ScaleTarget, WorkloadKind};

/// Connect using the in-cluster environment or the local kubeconfig.
pub async fn connect() -> KubeResult<kube::Client> {
    let client = kube::Client::try_default().await?;
    tracing::debug!(namespace = client.default_namespace(), "kubernetes client ready");
    Ok(client)
}
