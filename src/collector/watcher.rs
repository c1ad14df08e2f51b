//! Periodic reconciliation of live containers against the cached view.
//!
//! Each tick lists the host's containers, keeps only the env/label entries
//! whose keys some config references, diffs that filtered view against the
//! previous tick and restarts the running configs a change can affect.

use super::runtime::{ContainerRecord, ContainerRuntime, RuntimeError};
use super::selection::SelectionKeys;
use crate::manager::PluginManager;
use crate::reliability::AlarmKind;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const WATCHER_ALARM_SCOPE: &str = "container_watcher";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FilteredView {
    env: HashMap<String, String>,
    labels: HashMap<String, String>,
}

impl FilteredView {
    fn of(record: &ContainerRecord, keys: &SelectionKeys) -> Self {
        let keep = |values: &HashMap<String, String>, tracked: &HashSet<String>| {
            values
                .iter()
                .filter(|(key, _)| tracked.contains(*key))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        Self {
            env: keep(&record.env, &keys.env),
            labels: keep(&record.labels, &keys.label),
        }
    }
}

/// Keys whose value differs between two views, including keys present in
/// only one of them.
fn changed_keys(
    before: &HashMap<String, String>,
    after: &HashMap<String, String>,
) -> BTreeSet<String> {
    let mut changed: BTreeSet<String> = after
        .iter()
        .filter(|(key, value)| before.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect();
    changed.extend(
        before
            .keys()
            .filter(|key| !after.contains_key(*key))
            .cloned(),
    );
    changed
}

/// Drops keys that were not tracked on both ticks. A key that only just
/// became tracked has no previous value to compare against.
fn tracked_on_both(
    changed: BTreeSet<String>,
    previous: &HashSet<String>,
    current: &HashSet<String>,
) -> BTreeSet<String> {
    changed
        .into_iter()
        .filter(|key| previous.contains(key) && current.contains(key))
        .collect()
}

struct ContainerChange {
    id: String,
    env_keys: BTreeSet<String>,
    label_keys: BTreeSet<String>,
    before: FilteredView,
    after: FilteredView,
}

/// What a single tick observed and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub diff_env: BTreeSet<String>,
    pub diff_label: BTreeSet<String>,
    pub restarted: Vec<String>,
    pub recorded: usize,
}

impl TickReport {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty()
            || !self.removed.is_empty()
            || !self.changed.is_empty()
            || !self.diff_env.is_empty()
            || !self.diff_label.is_empty()
    }
}

pub struct ContainerWatcher {
    manager: Arc<PluginManager>,
    runtime: Arc<dyn ContainerRuntime>,
    interval: Duration,
    views: HashMap<String, FilteredView>,
    tracked: SelectionKeys,
}

impl ContainerWatcher {
    pub fn new(
        manager: Arc<PluginManager>,
        runtime: Arc<dyn ContainerRuntime>,
        interval: Duration,
    ) -> Self {
        Self {
            manager,
            runtime,
            interval,
            views: HashMap::new(),
            tracked: SelectionKeys::default(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.interval.as_millis() as u64, "Container watcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(report) if report.has_changes() => {
                    info!(
                        added = report.added.len(),
                        removed = report.removed.len(),
                        changed = report.changed.len(),
                        restarted = ?report.restarted,
                        recorded = report.recorded,
                        "Container state changed"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    self.manager.alarms().raise(
                        AlarmKind::ContainerList,
                        WATCHER_ALARM_SCOPE,
                        format!("container listing failed: {e}"),
                    );
                }
            }
        }
        info!("Container watcher stopped");
    }

    /// One reconciliation pass. A listing failure leaves every cache as it
    /// was.
    pub async fn tick(&mut self) -> Result<TickReport, RuntimeError> {
        let mut report = TickReport::default();
        let containers = Arc::clone(self.manager.containers());

        let summaries = self.runtime.list_containers().await?;
        let live: HashSet<&str> = summaries.iter().map(|s| s.id.as_str()).collect();

        for id in containers.ids() {
            if !live.contains(id.as_str()) {
                containers.remove(&id);
                self.views.remove(&id);
                report.removed.push(id);
            }
        }

        for summary in &summaries {
            match containers.get(&summary.id) {
                Some(mut record) => {
                    if record.labels != summary.labels || record.name != summary.name {
                        record.labels = summary.labels.clone();
                        record.name = summary.name.clone();
                        containers.upsert(record);
                    }
                }
                None => match self.runtime.inspect_container(&summary.id).await {
                    Ok(Some(mut record)) => {
                        record.labels = summary.labels.clone();
                        containers.upsert(record);
                        report.added.push(summary.id.clone());
                    }
                    Ok(None) => {
                        debug!(container_id = %summary.id, "Container vanished before inspection");
                    }
                    Err(e) => {
                        warn!(container_id = %summary.id, error = %e, "Inspect failed, retrying next tick");
                    }
                },
            }
        }

        let (diff_env, diff_label) = self.manager.compare_env_and_label();
        let keys = self.manager.selection_keys();

        let mut changes = Vec::new();
        for record in containers.snapshot() {
            let after = FilteredView::of(&record, &keys);
            if let Some(before) = self.views.get(&record.id) {
                let env_keys = tracked_on_both(
                    changed_keys(&before.env, &after.env),
                    &self.tracked.env,
                    &keys.env,
                );
                let label_keys = tracked_on_both(
                    changed_keys(&before.labels, &after.labels),
                    &self.tracked.label,
                    &keys.label,
                );
                if !env_keys.is_empty() || !label_keys.is_empty() {
                    changes.push(ContainerChange {
                        id: record.id.clone(),
                        env_keys,
                        label_keys,
                        before: before.clone(),
                        after: after.clone(),
                    });
                }
            }
            self.views.insert(record.id, after);
        }
        self.tracked = keys;
        report.changed = changes.iter().map(|c| c.id.clone()).collect();
        report.diff_env = diff_env;
        report.diff_label = diff_label;

        if !report.has_changes() {
            return Ok(report);
        }

        let running = self.manager.running_configs();

        let restarts: BTreeSet<String> = running
            .iter()
            .filter(|config| {
                changes.iter().any(|change| {
                    config.references(&change.env_keys, &change.label_keys)
                        && (config.matches_metadata(&change.before.env, &change.before.labels)
                            || config.matches_metadata(&change.after.env, &change.after.labels))
                })
            })
            .map(|config| config.name.clone())
            .collect();

        if !restarts.is_empty() {
            let errors = self.manager.restart_configs(restarts.iter().cloned()).await;
            for error in &errors {
                warn!(config = error.config_name(), error = %error, "Config restart failed");
            }
            report.restarted = restarts.into_iter().collect();
        }

        let new_matches: Vec<String> = report
            .added
            .iter()
            .filter(|id| {
                containers.get(id).is_some_and(|record| {
                    running.iter().any(|config| config.matches_container(&record))
                })
            })
            .cloned()
            .collect();
        report.recorded = self.manager.record_containers(&new_matches)
            + self
                .manager
                .record_containers_with_keys(&report.diff_env, &report.diff_label);

        Ok(report)
    }
}

impl std::fmt::Debug for ContainerWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerWatcher")
            .field("interval", &self.interval)
            .field("cached_views", &self.views.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_changed_keys_detects_value_add_and_remove() {
        let before = map(&[("a", "1"), ("b", "2")]);
        let after = map(&[("a", "1"), ("b", "3"), ("c", "4")]);
        let changed: Vec<String> = changed_keys(&before, &after).into_iter().collect();
        assert_eq!(changed, vec!["b", "c"]);

        let gone: Vec<String> = changed_keys(&after, &before).into_iter().collect();
        assert_eq!(gone, vec!["b", "c"]);
        assert!(changed_keys(&before, &before).is_empty());
    }

    #[test]
    fn test_newly_tracked_key_is_not_a_change() {
        let before = map(&[("test", "1")]);
        let after = map(&[("test", "1"), ("app", "web")]);
        let previous: HashSet<String> = ["test".to_string()].into();
        let current: HashSet<String> = ["test".to_string(), "app".to_string()].into();

        let changed = tracked_on_both(changed_keys(&before, &after), &previous, &current);
        assert!(changed.is_empty());

        let after = map(&[("test", "2"), ("app", "web")]);
        let changed: Vec<String> =
            tracked_on_both(changed_keys(&before, &after), &previous, &current)
                .into_iter()
                .collect();
        assert_eq!(changed, vec!["test"]);
    }

    #[test]
    fn test_filtered_view_keeps_tracked_keys_only() {
        let record = ContainerRecord::new("c1", "web")
            .with_env("test", "1")
            .with_env("PATH", "/bin")
            .with_label("app", "web");
        let mut keys = SelectionKeys::new();
        keys.env.insert("test".to_string());

        let view = FilteredView::of(&record, &keys);
        assert_eq!(view.env, map(&[("test", "1")]));
        assert!(view.labels.is_empty());
    }
}
