//! ruleshift.toml daemon configuration.
//!
//! Every section is optional; omitted values fall back to the defaults
//! below and command-line flags override whatever the file sets.
//!
//! ```toml
//! [target]
//! namespace = "default"
//! name = "workload-sim"
//! kind = "Deployment"
//!
//! [scaling]
//! min_replicas = 1
//! max_replicas = 10
//! calmdown_intervals = 3
//! check_interval_secs = 5
//!
//! [rules]
//! source = "cluster"          # AutoscalingRule resources, or "file"
//! namespace = "jobs"          # cluster source; omit to watch all namespaces
//! path = "/etc/ruleshift/rules.toml"
//! reload_interval_secs = 10   # file source
//! ```
//!
//! The API server connection comes from the in-cluster service account or
//! the local kubeconfig.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::bail;
use clap::{Args, ValueEnum};
use ruleshift_autoscale::AutoscalerConfig;
use ruleshift_kube::WorkloadKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub target: TargetConfig,
    pub scaling: ScalingConfig,
    pub rules: RulesConfig,
}

/// The workload being scaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub namespace: String,
    pub name: String,
    pub kind: WorkloadKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub calmdown_intervals: u32,
    pub check_interval_secs: u64,
}

/// Where scaling rules come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    /// `AutoscalingRule` custom resources.
    #[default]
    Cluster,
    /// A TOML rules file polled for changes.
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub source: RuleSource,
    /// Namespace watched for rule resources; all namespaces when unset.
    pub namespace: Option<String>,
    pub path: PathBuf,
    pub reload_interval_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            name: String::new(),
            kind: WorkloadKind::Deployment,
        }
    }
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 10,
            calmdown_intervals: 3,
            check_interval_secs: 5,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            source: RuleSource::Cluster,
            namespace: None,
            path: PathBuf::from("rules.toml"),
            reload_interval_secs: 10,
        }
    }
}

/// Command-line overrides for [`DaemonConfig`].
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Namespace of the target workload.
    #[arg(long)]
    pub target_namespace: Option<String>,

    /// Name of the target workload.
    #[arg(long)]
    pub target_name: Option<String>,

    /// Kind of the target workload (Deployment or StatefulSet).
    #[arg(long)]
    pub target_kind: Option<WorkloadKind>,

    #[arg(long)]
    pub min_replicas: Option<u32>,

    #[arg(long)]
    pub max_replicas: Option<u32>,

    /// Ticks without evaluation after a scale, counting the scaling tick.
    #[arg(long)]
    pub calmdown_intervals: Option<u32>,

    /// Seconds between control loop ticks.
    #[arg(long)]
    pub check_interval: Option<u64>,

    /// Where scaling rules come from.
    #[arg(long, value_enum)]
    pub rules_source: Option<RuleSource>,

    /// Namespace watched for AutoscalingRule resources.
    #[arg(long)]
    pub rules_namespace: Option<String>,

    /// Path of the rules file. Selects the file source.
    #[arg(long)]
    pub rules: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(namespace) = overrides.target_namespace {
            self.target.namespace = namespace;
        }
        if let Some(name) = overrides.target_name {
            self.target.name = name;
        }
        if let Some(kind) = overrides.target_kind {
            self.target.kind = kind;
        }
        if let Some(min) = overrides.min_replicas {
            self.scaling.min_replicas = min;
        }
        if let Some(max) = overrides.max_replicas {
            self.scaling.max_replicas = max;
        }
        if let Some(calmdown) = overrides.calmdown_intervals {
            self.scaling.calmdown_intervals = calmdown;
        }
        if let Some(interval) = overrides.check_interval {
            self.scaling.check_interval_secs = interval;
        }
        if let Some(path) = overrides.rules {
            self.rules.path = path;
            self.rules.source = RuleSource::File;
        }
        if let Some(source) = overrides.rules_source {
            self.rules.source = source;
        }
        if let Some(namespace) = overrides.rules_namespace {
            self.rules.namespace = Some(namespace);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.target.name.trim().is_empty() {
            bail!("target name is required");
        }
        if self.scaling.min_replicas > self.scaling.max_replicas {
            bail!(
                "min_replicas ({}) exceeds max_replicas ({})",
                self.scaling.min_replicas,
                self.scaling.max_replicas
            );
        }
        if self.scaling.check_interval_secs == 0 {
            bail!("check_interval_secs must be positive");
        }
        if self.rules.source == RuleSource::File && self.rules.reload_interval_secs == 0 {
            bail!("rules reload_interval_secs must be positive");
        }
        Ok(())
    }

    pub fn autoscaler_config(&self) -> AutoscalerConfig {
        AutoscalerConfig {
            interval: Duration::from_secs(self.scaling.check_interval_secs),
            calmdown_intervals: self.scaling.calmdown_intervals,
            min_replicas: self.scaling.min_replicas,
            max_replicas: self.scaling.max_replicas,
        }
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.rules.reload_interval_secs)
    }
}
