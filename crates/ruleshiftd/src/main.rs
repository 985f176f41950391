//! ruleshiftd — the ruleshift daemon.
//!
//! Scales one Deployment or StatefulSet from rules evaluated against the
//! custom metrics API. Rules are `AutoscalingRule` resources watched in the
//! cluster, or a TOML file polled for changes while the daemon runs.
//!
//! # Usage
//!
//! ```text
//! ruleshiftd crd | kubectl apply -f -
//! ruleshiftd run --config ruleshift.toml --target-name workload-sim
//! ruleshiftd run --target-name workload-sim --rules rules.toml
//! ruleshiftd check rules.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ruleshift_autoscale::Autoscaler;
use kube::CustomResourceExt;
use ruleshift_kube::{AutoscalingRule, CustomMetricsSource, ScaleTarget, watch_rules};
use ruleshift_rules::{RuleRegistry, load_rules_file};
use tokio::sync::watch;
use tracing::{info, warn};

mod config;

use config::{DaemonConfig, Overrides, RuleSource};

const DEFAULT_FILTER: &str =
    "info,ruleshiftd=debug,ruleshift_autoscale=debug,ruleshift_kube=debug";

#[derive(Parser)]
#[command(name = "ruleshiftd", about = "Rule-driven replica autoscaler", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop against the configured workload.
    Run {
        /// Daemon configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },
    /// Validate a rules file and list the rules it defines.
    Check {
        /// Path of the rules file.
        rules: PathBuf,
    },
    /// Print the AutoscalingRule CustomResourceDefinition.
    Crd,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        Command::Run { config, overrides } => {
            let mut daemon_config = match config {
                Some(path) => DaemonConfig::from_file(&path)?,
                None => DaemonConfig::default(),
            };
            daemon_config.apply(overrides);
            run(daemon_config).await
        }
        Command::Check { rules } => check(&rules).await,
        Command::Crd => {
            println!("{}", serde_json::to_string_pretty(&AutoscalingRule::crd())?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => DEFAULT_FILTER.parse()?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    config.validate()?;
    info!(
        target_kind = %config.target.kind,
        namespace = %config.target.namespace,
        name = %config.target.name,
        min = config.scaling.min_replicas,
        max = config.scaling.max_replicas,
        rules = ?config.rules.source,
        "ruleshift daemon starting"
    );

    let client = ruleshift_kube::connect().await?;

    // ── Rules ─────────────────────────────────────────────────

    let registry = RuleRegistry::new();
    if config.rules.source == RuleSource::File {
        match load_rules_file(&config.rules.path).await {
            Ok(rules) => {
                registry.sync(rules).await?;
                info!(path = ?config.rules.path, rules = registry.len().await, "rules loaded");
            }
            // The watcher keeps retrying, so a missing file is not fatal.
            Err(e) => warn!(path = ?config.rules.path, error = %e, "starting without rules"),
        }
    }

    // ── Adapters ──────────────────────────────────────────────

    let source = Arc::new(CustomMetricsSource::new(client.clone()));
    let target = ScaleTarget::new(
        client.clone(),
        &config.target.namespace,
        &config.target.name,
        config.target.kind,
    );
    let mut autoscaler = Autoscaler::new(config.autoscaler_config(), registry.clone(), source, target);

    // ── Background tasks ──────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let watcher_handle = match config.rules.source {
        RuleSource::File => tokio::spawn(registry.watch_file(
            config.rules.path.clone(),
            config.reload_interval(),
            shutdown_rx.clone(),
        )),
        RuleSource::Cluster => tokio::spawn(watch_rules(
            client,
            config.rules.namespace.clone(),
            registry,
            shutdown_rx.clone(),
        )),
    };

    let autoscale_handle = tokio::spawn(async move {
        autoscaler.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = watcher_handle.await;
    let _ = autoscale_handle.await;

    info!("ruleshift daemon stopped");
    Ok(())
}

async fn check(path: &Path) -> anyhow::Result<()> {
    let rules = load_rules_file(path).await?;
    let registry = RuleRegistry::new();
    registry.sync(rules).await?;

    let snapshot = registry.snapshot().await;
    println!("✓ {} rule(s) in {}", snapshot.len(), path.display());
    for rule in snapshot.values() {
        println!(
            "  {} (priority {}, namespace {}): {} / {}, limits {}..{}, desired {}, fires at {}",
            rule.name,
            rule.priority,
            rule.namespace,
            rule.value_metric,
            rule.delta_metric,
            rule.limits.lower_limit,
            rule.limits.upper_limit,
            rule.limits.desired_usage,
            rule.limits.max_violation_count,
        );
    }
    Ok(())
}
