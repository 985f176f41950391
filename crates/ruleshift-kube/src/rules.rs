//! `AutoscalingRule` custom resource and the watcher that mirrors it into
//! the rule registry.
//!
//! ```yaml
//! apiVersion: ruleshift.dev/v1
//! kind: AutoscalingRule
//! metadata:
//!   name: queue-depth
//!   namespace: jobs
//! spec:
//!   priority: 2
//!   valueMetric: queue_length
//!   deltaMetric: queue_length_delta
//!   modes:
//!     downscaling: disabled
//!   limits:
//!     upperLimit: "800"
//!     lowerLimit: "200"
//!     desiredUsage: "500"
//!     maxViolationCount: 5
//! ```

use std::collections::BTreeMap;
use std::pin::pin;

use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use kube::runtime::watcher::Event;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, CustomResource, ResourceExt};
use ruleshift_rules::{
    Limits, Quantity, Rule, RuleError, RuleId, RuleRegistry, ScalingMode, ScalingModes,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{KubeError, KubeResult};

/// Desired state of an `AutoscalingRule`.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ruleshift.dev",
    version = "v1",
    kind = "AutoscalingRule",
    namespaced,
    printcolumn = r#"{"name":"Priority","type":"integer","jsonPath":".spec.priority"}"#,
    printcolumn = r#"{"name":"Value","type":"string","jsonPath":".spec.valueMetric"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingRuleSpec {
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Namespace the metrics are read from. Defaults to the rule's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_namespace: Option<String>,
    pub value_metric: String,
    pub delta_metric: String,
    #[serde(default)]
    pub modes: ModesSpec,
    pub limits: LimitsSpec,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModesSpec {
    #[serde(default)]
    pub upscaling: ModeSpec,
    #[serde(default)]
    pub downscaling: ModeSpec,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModeSpec {
    #[default]
    Auto,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LimitsSpec {
    pub upper_limit: K8sQuantity,
    pub lower_limit: K8sQuantity,
    pub desired_usage: K8sQuantity,
    pub max_violation_count: f64,
}

fn default_priority() -> u32 {
    1
}

impl From<ModeSpec> for ScalingMode {
    fn from(mode: ModeSpec) -> Self {
        match mode {
            ModeSpec::Auto => ScalingMode::Auto,
            ModeSpec::Disabled => ScalingMode::Disabled,
        }
    }
}

impl AutoscalingRule {
    /// Convert to a validated registry rule named after the resource.
    pub fn to_rule(&self) -> KubeResult<Rule> {
        let name = self.name_any();
        let invalid = |source: RuleError| KubeError::InvalidRule {
            name: name.clone(),
            source,
        };
        let quantity = |q: &K8sQuantity| Quantity::parse(&q.0).map_err(invalid);

        let spec = &self.spec;
        let namespace = spec
            .metrics_namespace
            .clone()
            .or_else(|| self.namespace())
            .unwrap_or_else(|| "default".to_string());

        let rule = Rule {
            name: name.clone(),
            namespace,
            value_metric: spec.value_metric.clone(),
            delta_metric: spec.delta_metric.clone(),
            priority: spec.priority,
            modes: ScalingModes {
                upscaling: spec.modes.upscaling.into(),
                downscaling: spec.modes.downscaling.into(),
            },
            limits: Limits {
                upper_limit: quantity(&spec.limits.upper_limit)?,
                lower_limit: quantity(&spec.limits.lower_limit)?,
                desired_usage: quantity(&spec.limits.desired_usage)?,
                max_violation_count: spec.limits.max_violation_count,
            },
        };
        rule.validate().map_err(invalid)?;
        Ok(rule)
    }
}

/// Applies watcher events to a [`RuleRegistry`].
///
/// A (re)list is buffered between `Init` and `InitDone` and then synced as a
/// whole, so rules deleted while the watch was down disappear as well.
pub struct RuleEvents {
    registry: RuleRegistry,
    relist: Option<BTreeMap<RuleId, Rule>>,
}

impl RuleEvents {
    pub fn new(registry: RuleRegistry) -> Self {
        Self {
            registry,
            relist: None,
        }
    }

    pub async fn handle(&mut self, event: Event<AutoscalingRule>) {
        match event {
            Event::Init => {
                debug!("autoscaling rule list started");
                self.relist = Some(BTreeMap::new());
            }
            Event::InitApply(resource) => {
                if let Some(rule) = convert(&resource) {
                    self.relist
                        .get_or_insert_with(BTreeMap::new)
                        .insert(rule.name.clone(), rule);
                }
            }
            Event::InitDone => {
                let rules = self.relist.take().unwrap_or_default().into_values().collect();
                match self.registry.sync(rules).await {
                    Ok(summary) => info!(
                        added = summary.added.len(),
                        updated = summary.updated.len(),
                        removed = summary.removed.len(),
                        "autoscaling rules synced"
                    ),
                    Err(e) => warn!(error = %e, "failed to sync autoscaling rules"),
                }
            }
            Event::Apply(resource) => match convert(&resource) {
                Some(rule) => {
                    if let Err(e) = self.registry.add(rule).await {
                        warn!(error = %e, "failed to add autoscaling rule");
                    }
                }
                // An update that breaks the rule takes it out of consensus.
                None => {
                    self.registry.remove(&resource.name_any()).await;
                }
            },
            Event::Delete(resource) => {
                self.registry.remove(&resource.name_any()).await;
            }
        }
    }
}

fn convert(resource: &AutoscalingRule) -> Option<Rule> {
    match resource.to_rule() {
        Ok(rule) => Some(rule),
        Err(e) => {
            warn!(error = %e, "ignoring invalid autoscaling rule");
            None
        }
    }
}

/// Watch `AutoscalingRule` resources in `namespace` (all namespaces when
/// `None`) and mirror them into `registry` until `shutdown` changes.
pub async fn watch_rules(
    client: Client,
    namespace: Option<String>,
    registry: RuleRegistry,
    mut shutdown: watch::Receiver<bool>,
) {
    let api: Api<AutoscalingRule> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    info!(
        namespace = namespace.as_deref().unwrap_or("*"),
        "autoscaling rule watcher started"
    );

    let mut events = RuleEvents::new(registry);
    let mut stream = pin!(watcher(api, watcher::Config::default()).default_backoff());

    loop {
        tokio::select! {
            next = stream.next() => match next {
                Some(Ok(event)) => events.handle(event).await,
                Some(Err(e)) => warn!(error = %e, "autoscaling rule watch failed"),
                None => break,
            },
            _ = shutdown.changed() => {
                debug!("autoscaling rule watcher shutting down");
                break;
            }
        }
    }
}
