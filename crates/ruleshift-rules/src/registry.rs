//! Shared rule registry.
//!
//! The registry is mutated by whatever watches rule definitions (a file
//! poller in `ruleshiftd`) and read by the autoscaler once per tick. A
//! tick operates on the [`RuleSnapshot`] taken at its start, so membership
//! changes only become visible on the following tick.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use crate::error::{RuleError, RuleResult};
use crate::types::{Rule, RuleId, RulesFile};

/// Immutable view of the active rules, ordered by name.
pub type RuleSnapshot = BTreeMap<RuleId, Arc<Rule>>;

/// Changes applied by [`RuleRegistry::sync`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub added: Vec<RuleId>,
    pub updated: Vec<RuleId>,
    pub removed: Vec<RuleId>,
}

impl SyncSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Cloneable handle to the set of active rules.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Arc<RwLock<BTreeMap<RuleId, Arc<Rule>>>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a rule. Returns `true` if the rule was new.
    pub async fn add(&self, rule: Rule) -> RuleResult<bool> {
        rule.validate()?;
        let name = rule.name.clone();
        let previous = self.rules.write().await.insert(name.clone(), Arc::new(rule));
        if previous.is_some() {
            info!(rule = %name, "rule updated");
        } else {
            info!(rule = %name, "rule added");
        }
        Ok(previous.is_none())
    }

    /// Remove a rule by name.
    pub async fn remove(&self, name: &str) -> Option<Arc<Rule>> {
        let removed = self.rules.write().await.remove(name);
        if removed.is_some() {
            info!(rule = %name, "rule deleted");
        }
        removed
    }

    /// Copy of the current rule set.
    pub async fn snapshot(&self) -> RuleSnapshot {
        self.rules.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.rules.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rules.read().await.is_empty()
    }

    /// Replace the rule set with `rules`, emitting add/remove notifications
    /// for the difference. Unchanged rules keep their existing entry.
    pub async fn sync(&self, rules: Vec<Rule>) -> RuleResult<SyncSummary> {
        let mut seen = HashSet::new();
        for rule in &rules {
            rule.validate()?;
            if !seen.insert(rule.name.clone()) {
                return Err(RuleError::Duplicate(rule.name.clone()));
            }
        }

        let mut current = self.rules.write().await;
        let mut summary = SyncSummary::default();

        let stale: Vec<RuleId> = current
            .keys()
            .filter(|name| !seen.contains(*name))
            .cloned()
            .collect();
        for name in stale {
            current.remove(&name);
            info!(rule = %name, "rule deleted");
            summary.removed.push(name);
        }

        for rule in rules {
            match current.get(&rule.name) {
                Some(existing) if **existing == rule => {}
                Some(_) => {
                    info!(rule = %rule.name, "rule updated");
                    summary.updated.push(rule.name.clone());
                    current.insert(rule.name.clone(), Arc::new(rule));
                }
                None => {
                    info!(rule = %rule.name, "rule added");
                    summary.added.push(rule.name.clone());
                    current.insert(rule.name.clone(), Arc::new(rule));
                }
            }
        }

        Ok(summary)
    }

    /// Poll a rules file and sync the registry with its contents.
    ///
    /// A file that fails to load leaves the current rule set untouched.
    pub async fn watch_file(
        self,
        path: PathBuf,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!(path = ?path, interval_secs = interval.as_secs(), "rules watcher started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = match load_rules_file(&path).await {
                        Ok(rules) => self.sync(rules).await,
                        Err(e) => Err(e),
                    };
                    match result {
                        Ok(summary) if !summary.is_empty() => {
                            debug!(
                                added = summary.added.len(),
                                updated = summary.updated.len(),
                                removed = summary.removed.len(),
                                "rules reloaded"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(path = ?path, error = %e, "failed to reload rules"),
                    }
                }
                _ = shutdown.changed() => {
                    debug!("rules watcher shutting down");
                    break;
                }
            }
        }
    }
}

/// Read and parse a TOML rules file.
pub async fn load_rules_file(path: &Path) -> RuleResult<Vec<Rule>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RuleError::Read(format!("{}: {e}", path.display())))?;
    let file: RulesFile =
        toml::from_str(&content).map_err(|e| RuleError::Parse(format!("{}: {e}", path.display())))?;
    Ok(file.rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::rule;

    #[tokio::test]
    async fn add_and_remove() {
        let registry = RuleRegistry::new();
        assert!(registry.add(rule("cpu")).await.unwrap());
        assert!(!registry.add(rule("cpu")).await.unwrap());
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove("cpu").await.is_some());
        assert!(registry.remove("cpu").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn add_rejects_invalid_rule() {
        let registry = RuleRegistry::new();
        let mut r = rule("cpu");
        r.priority = 0;
        assert!(registry.add(r).await.is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn snapshot_is_isolated_from_later_changes() {
        let registry = RuleRegistry::new();
        registry.add(rule("a")).await.unwrap();

        let snapshot = registry.snapshot().await;
        registry.add(rule("b")).await.unwrap();
        registry.remove("a").await;

        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(registry.snapshot().await.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[tokio::test]
    async fn sync_reports_differences() {
        let registry = RuleRegistry::new();
        registry.add(rule("keep")).await.unwrap();
        registry.add(rule("change")).await.unwrap();
        registry.add(rule("drop")).await.unwrap();

        let mut changed = rule("change");
        changed.priority = 5;

        let summary = registry
            .sync(vec![rule("keep"), changed, rule("new")])
            .await
            .unwrap();

        assert_eq!(summary.added, vec!["new".to_string()]);
        assert_eq!(summary.updated, vec!["change".to_string()]);
        assert_eq!(summary.removed, vec!["drop".to_string()]);
        assert_eq!(registry.snapshot().await["change"].priority, 5);
    }

    #[tokio::test]
    async fn sync_rejects_duplicates_without_mutating() {
        let registry = RuleRegistry::new();
        registry.add(rule("a")).await.unwrap();

        let result = registry.sync(vec![rule("b"), rule("b")]).await;
        assert!(matches!(result, Err(RuleError::Duplicate(name)) if name == "b"));
        assert_eq!(registry.snapshot().await.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[tokio::test]
    async fn load_rules_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(
            &path,
            r#"
            [[rules]]
            name = "queue"
            namespace = "jobs"
            value_metric = "queue_length"
            delta_metric = "queue_length_delta"
            priority = 3

            [rules.modes]
            downscaling = "disabled"

            [rules.limits]
            upper_limit = 800
            lower_limit = 200
            desired_usage = "500"
            max_violation_count = 5.0
            "#,
        )
        .unwrap();

        let rules = load_rules_file(&path).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].namespace, "jobs");
        assert_eq!(rules[0].priority, 3);
        assert_eq!(rules[0].limits.upper_limit.milli_value(), 800_000);
    }

    #[tokio::test]
    async fn load_missing_file_fails() {
        let result = load_rules_file(Path::new("/nonexistent/rules.toml")).await;
        assert!(matches!(result, Err(RuleError::Read(_))));
    }
}
