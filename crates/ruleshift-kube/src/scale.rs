//! Scale subresource target for Deployments and StatefulSets.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::Client;
use kube::api::{Api, Patch, PatchParams};
use ruleshift_autoscale::{ReplicaStatus, Target};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::KubeError;

/// Kind of workload being scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkloadKind {
    #[default]
    Deployment,
    StatefulSet,
}

impl FromStr for WorkloadKind {
    type Err = KubeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deployment" | "deployments" => Ok(Self::Deployment),
            "statefulset" | "statefulsets" => Ok(Self::StatefulSet),
            _ => Err(KubeError::UnsupportedKind(s.to_string())),
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deployment => f.write_str("Deployment"),
            Self::StatefulSet => f.write_str("StatefulSet"),
        }
    }
}

/// Replica counts are never negative; treat anything else as absent.
fn count(replicas: Option<i32>) -> u32 {
    replicas.and_then(|r| u32::try_from(r).ok()).unwrap_or(0)
}

/// The workload whose replica count is controlled.
#[derive(Clone)]
pub struct ScaleTarget {
    client: Client,
    namespace: String,
    name: String,
    kind: WorkloadKind,
}

impl ScaleTarget {
    pub fn new(client: Client, namespace: &str, name: &str, kind: WorkloadKind) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind,
        }
    }

    pub fn kind(&self) -> WorkloadKind {
        self.kind
    }
}

impl Target for ScaleTarget {
    async fn get(&self) -> anyhow::Result<ReplicaStatus> {
        let status = match self.kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
                let status = api.get(&self.name).await?.status.unwrap_or_default();
                ReplicaStatus {
                    current: count(status.replicas),
                    ready: count(status.ready_replicas),
                }
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &self.namespace);
                let status = api.get(&self.name).await?.status.unwrap_or_default();
                ReplicaStatus {
                    current: count(Some(status.replicas)),
                    ready: count(status.ready_replicas),
                }
            }
        };
        Ok(status)
    }

    async fn set(&self, desired: u32) -> anyhow::Result<()> {
        let params = PatchParams::default();
        let patch = Patch::Merge(json!({ "spec": { "replicas": desired } }));
        let scale = match self.kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
                api.patch_scale(&self.name, &params, &patch).await?
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &self.namespace);
                api.patch_scale(&self.name, &params, &patch).await?
            }
        };
        debug!(
            kind = %self.kind,
            namespace = %self.namespace,
            name = %self.name,
            replicas = ?scale.spec.and_then(|s| s.replicas),
            "scale subresource updated"
        );
        Ok(())
    }
}
