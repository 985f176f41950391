//! End-to-end control loop: rules file -> registry -> autoscaler -> target.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use ruleshift_autoscale::{
    Autoscaler, AutoscalerConfig, MetricError, MetricResult, MetricSource, Phase, ReplicaStatus,
    Sample, ScaleError, Target, TickOutcome,
};
use ruleshift_rules::{Quantity, RuleRegistry, load_rules_file};
use tokio::sync::watch;

const TWO_RULES: &str = r#"
[[rules]]
name = "queue"
value_metric = "queue_length"
delta_metric = "queue_length_delta"
priority = 3

[rules.limits]
upper_limit = 80
lower_limit = 20
desired_usage = 50
max_violation_count = 1.0

[[rules]]
name = "latency"
value_metric = "latency_p99"
delta_metric = "latency_p99_delta"

[rules.limits]
upper_limit = 80
lower_limit = 20
desired_usage = 50
max_violation_count = 5.0
"#;

const QUEUE_ONLY: &str = r#"
[[rules]]
name = "queue"
value_metric = "queue_length"
delta_metric = "queue_length_delta"
priority = 3

[rules.limits]
upper_limit = 80
lower_limit = 20
desired_usage = 50
max_violation_count = 1.0
"#;

#[derive(Default)]
struct Telemetry {
    values: Mutex<HashMap<String, i64>>,
}

impl Telemetry {
    fn set(&self, metric: &str, milli: i64) {
        self.values.lock().unwrap().insert(metric.to_string(), milli);
    }
}

impl MetricSource for Telemetry {
    async fn fetch(&self, metric: &str, _scope: &str) -> MetricResult<Vec<Sample>> {
        let value = self.values.lock().unwrap().get(metric).copied();
        value
            .map(|milli| vec![Sample::new(Utc::now(), Quantity::from_milli(milli))])
            .ok_or_else(|| MetricError::Fetch {
                metric: metric.to_string(),
                reason: "no such metric".to_string(),
            })
    }
}

struct Workload {
    status: Mutex<ReplicaStatus>,
    writes: Mutex<Vec<u32>>,
}

impl Workload {
    fn new(replicas: u32) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(ReplicaStatus {
                current: replicas,
                ready: replicas,
            }),
            writes: Mutex::new(Vec::new()),
        })
    }

    fn writes(&self) -> Vec<u32> {
        self.writes.lock().unwrap().clone()
    }
}

impl Target for Workload {
    async fn get(&self) -> anyhow::Result<ReplicaStatus> {
        Ok(*self.status.lock().unwrap())
    }

    async fn set(&self, desired: u32) -> anyhow::Result<()> {
        self.writes.lock().unwrap().push(desired);
        *self.status.lock().unwrap() = ReplicaStatus {
            current: desired,
            ready: desired,
        };
        Ok(())
    }
}

fn config() -> AutoscalerConfig {
    AutoscalerConfig {
        interval: Duration::from_millis(10),
        calmdown_intervals: 3,
        min_replicas: 1,
        max_replicas: 10,
    }
}

fn write_rules(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

/// Queue at its upper limit and rising, latency flat mid-range.
fn busy_queue() -> Arc<Telemetry> {
    let telemetry = Arc::new(Telemetry::default());
    telemetry.set("queue_length", 80_000);
    telemetry.set("queue_length_delta", 1_000);
    telemetry.set("latency_p99", 50_000);
    telemetry.set("latency_p99_delta", 0);
    telemetry
}

#[tokio::test]
async fn rules_file_drives_weighted_scale_up_and_calmdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.toml");
    write_rules(&path, TWO_RULES);

    let registry = RuleRegistry::new();
    registry.sync(load_rules_file(&path).await.unwrap()).await.unwrap();

    let workload = Workload::new(4);
    let mut scaler = Autoscaler::new(config(), registry, busy_queue(), workload.clone());

    // queue wants 5 (weight 3), latency holds at 4 (weight 1): 19 / 4 rounds to 5.
    assert_eq!(
        scaler.tick().await.unwrap(),
        TickOutcome::Scaled { from: 4, to: 5 }
    );
    assert_eq!(scaler.evaluations().len(), 2);

    assert_eq!(scaler.tick().await.unwrap(), TickOutcome::Calm { remaining: 1 });
    assert_eq!(scaler.tick().await.unwrap(), TickOutcome::Calm { remaining: 0 });
    assert_eq!(scaler.phase(), Phase::Active);
    assert_eq!(workload.writes(), vec![5]);
}

#[tokio::test]
async fn removed_rules_are_pruned_on_next_tick() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.toml");
    write_rules(&path, TWO_RULES);

    let registry = RuleRegistry::new();
    registry.sync(load_rules_file(&path).await.unwrap()).await.unwrap();

    let telemetry = Arc::new(Telemetry::default());
    for metric in ["queue_length", "latency_p99"] {
        telemetry.set(metric, 50_000);
        telemetry.set(&format!("{metric}_delta"), 0);
    }

    let workload = Workload::new(4);
    let mut scaler = Autoscaler::new(config(), registry.clone(), telemetry, workload);

    scaler.tick().await.unwrap();
    assert_eq!(scaler.evaluations().len(), 2);

    write_rules(&path, QUEUE_ONLY);
    let summary = registry.sync(load_rules_file(&path).await.unwrap()).await.unwrap();
    assert_eq!(summary.removed, vec!["latency".to_string()]);

    scaler.tick().await.unwrap();
    assert_eq!(
        scaler.evaluations().keys().collect::<Vec<_>>(),
        vec!["queue"]
    );

    write_rules(&path, "rules = []\n");
    registry.sync(load_rules_file(&path).await.unwrap()).await.unwrap();
    assert!(matches!(
        scaler.tick().await,
        Err(ScaleError::ConsensusUndefined(_))
    ));
    assert!(scaler.evaluations().is_empty());
}

#[tokio::test]
async fn daemon_loop_picks_up_rules_and_stops_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.toml");
    write_rules(&path, QUEUE_ONLY);

    let registry = RuleRegistry::new();
    let workload = Workload::new(4);
    let mut scaler = Autoscaler::new(config(), registry.clone(), busy_queue(), workload.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = tokio::spawn(registry.clone().watch_file(
        path.clone(),
        Duration::from_millis(10),
        shutdown_rx.clone(),
    ));
    let control = tokio::spawn(async move {
        scaler.run(shutdown_rx).await;
    });

    let scaled = tokio::time::timeout(Duration::from_secs(5), async {
        while workload.writes().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(scaled.is_ok(), "autoscaler never scaled the workload");
    assert_eq!(workload.writes()[0], 5);
    assert_eq!(registry.len().await, 1);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), watcher)
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(1), control)
        .await
        .unwrap()
        .unwrap();
}
