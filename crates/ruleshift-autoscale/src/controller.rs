//! Scaling controller: the periodic control loop.
//!
//! Each tick the controller either counts down an active calmdown or
//! evaluates every rule of the current snapshot concurrently, waits for
//! all of them, and scales the target to the priority-weighted consensus.
//!
//! ```text
//!            scale succeeded (calmdown > 1)
//!   Active ─────────────────────────────────▶ Calmdown { remaining }
//!     ▲                                            │
//!     └──────────── remaining reaches 0 ───────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ruleshift_rules::{RuleId, RuleRegistry, RuleSnapshot};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{Level, debug, error, info, warn};

use crate::consensus::aggregate;
use crate::error::{ScaleError, ScaleResult};
use crate::evaluation::{EvaluationParams, MetricEvaluation, evaluate_rule};
use crate::source::MetricSource;
use crate::table::render_table;
use crate::target::Target;

/// Controller parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoscalerConfig {
    /// Period between ticks.
    pub interval: Duration,
    /// Ticks without evaluation after a scale, counting the scaling tick.
    pub calmdown_intervals: u32,
    pub min_replicas: u32,
    pub max_replicas: u32,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            calmdown_intervals: 3,
            min_replicas: 1,
            max_replicas: 10,
        }
    }
}

/// Hysteresis state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Active,
    Calmdown { remaining: u32 },
}

/// What a completed tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Evaluation skipped while calming down.
    Calm { remaining: u32 },
    /// Consensus matches the current replica count.
    Unchanged { replicas: u32 },
    /// The target was scaled.
    Scaled { from: u32, to: u32 },
}

/// Rule-driven autoscaler for a single target.
pub struct Autoscaler<M, T> {
    config: AutoscalerConfig,
    registry: RuleRegistry,
    source: Arc<M>,
    target: T,
    /// Per-rule state, keyed by rule name.
    evaluations: HashMap<RuleId, MetricEvaluation>,
    phase: Phase,
}

impl<M: MetricSource, T: Target> Autoscaler<M, T> {
    pub fn new(config: AutoscalerConfig, registry: RuleRegistry, source: Arc<M>, target: T) -> Self {
        Self {
            config,
            registry,
            source,
            target,
            evaluations: HashMap::new(),
            phase: Phase::Active,
        }
    }

    pub fn config(&self) -> &AutoscalerConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn evaluations(&self) -> &HashMap<RuleId, MetricEvaluation> {
        &self.evaluations
    }

    fn params(&self) -> EvaluationParams {
        EvaluationParams {
            calmdown_intervals: self.config.calmdown_intervals,
            min_replicas: self.config.min_replicas,
            max_replicas: self.config.max_replicas,
        }
    }

    fn clamp(&self, replicas: u32) -> u32 {
        replicas
            .max(self.config.min_replicas)
            .min(self.config.max_replicas)
    }

    /// Run a single tick.
    pub async fn tick(&mut self) -> ScaleResult<TickOutcome> {
        if let Phase::Calmdown { remaining } = self.phase {
            let remaining = remaining.saturating_sub(1);
            debug!(
                remaining,
                total = self.config.calmdown_intervals,
                "calming down after scaling"
            );
            self.phase = if remaining == 0 {
                Phase::Active
            } else {
                Phase::Calmdown { remaining }
            };
            return Ok(TickOutcome::Calm { remaining });
        }

        let status = self
            .target
            .get()
            .await
            .map_err(|e| ScaleError::TargetRead(format!("{e:#}")))?;
        if !status.is_stable() {
            return Err(ScaleError::TargetUnstable {
                current: status.current,
                ready: status.ready,
            });
        }

        let rules = self.registry.snapshot().await;
        self.evaluate_rules(&rules, status.current).await;

        if tracing::enabled!(Level::DEBUG) {
            let table = render_table(&self.evaluations, &rules);
            if !table.is_empty() {
                debug!("rule overview\n{table}");
            }
        }

        let desired = self.clamp(aggregate(&self.evaluations, &rules)?);
        if desired == status.current {
            debug!(replicas = desired, "replica count unchanged");
            return Ok(TickOutcome::Unchanged { replicas: desired });
        }

        info!(from = status.current, to = desired, "new desired replica count");
        self.target
            .set(desired)
            .await
            .map_err(|e| ScaleError::TargetUpdate {
                desired,
                reason: format!("{e:#}"),
            })?;
        info!(replicas = desired, "scaled target");

        // The scaling tick counts as the first calm interval.
        let remaining = self.config.calmdown_intervals.saturating_sub(1);
        if remaining > 0 {
            self.phase = Phase::Calmdown { remaining };
        }

        Ok(TickOutcome::Scaled {
            from: status.current,
            to: desired,
        })
    }

    /// Evaluate every rule of the snapshot concurrently and wait for all.
    ///
    /// Each task works on its own copy of its rule's state. The stored
    /// record is only replaced when the task completes, so a failed task
    /// leaves the rule's last state in place.
    async fn evaluate_rules(&mut self, rules: &RuleSnapshot, current_replicas: u32) {
        debug!(rules = rules.len(), "tick, evaluating all rules");

        self.evaluations.retain(|id, _| {
            let keep = rules.contains_key(id);
            if !keep {
                debug!(rule = %id, "dropping state of removed rule");
            }
            keep
        });

        let params = self.params();
        let mut tasks = JoinSet::new();
        for (id, rule) in rules {
            let evaluation = self.evaluations.get(id).cloned();
            let source = Arc::clone(&self.source);
            let rule = Arc::clone(rule);
            tasks.spawn(async move {
                let evaluation =
                    evaluate_rule(source.as_ref(), &rule, evaluation, current_replicas, &params)
                        .await;
                (rule.name.clone(), evaluation)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Some(evaluation))) => {
                    self.evaluations.insert(id, evaluation);
                }
                Ok((_, None)) => {}
                Err(e) => error!(error = %e, "rule evaluation task failed, keeping previous state"),
            }
        }

        debug!("all rules evaluated");
    }

    /// Run the control loop until `shutdown` changes.
    ///
    /// Ticks are awaited in place, so a slow tick delays the next one
    /// instead of overlapping it; missed timer fires are skipped.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            calmdown_intervals = self.config.calmdown_intervals,
            min_replicas = self.config.min_replicas,
            max_replicas = self.config.max_replicas,
            "autoscaler started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; evaluate one period in.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(outcome) => debug!(?outcome, "tick complete"),
                        Err(e @ ScaleError::TargetUnstable { .. }) => info!(error = %e, "tick skipped"),
                        Err(e @ ScaleError::ConsensusUndefined(_)) => warn!(error = %e, "tick skipped"),
                        Err(e) => error!(error = %e, "error while evaluating rules"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}
