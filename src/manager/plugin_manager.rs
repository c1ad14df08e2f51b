//! Owns the loaded configs, their running pipelines and the process-wide
//! env/label key sets used for container selection.

use super::config::{Config, ConfigState};
use super::error::ManagerError;
use crate::collector::{ContainerRegistry, ContainerRuntime, SelectionKeys, SelectionRule};
use crate::pipeline::PipelineRunner;
use crate::plugin::{PipelineSpec, PluginContext, PluginDecl, PluginKind, PluginRegistry};
use crate::reliability::{AlarmKind, AlarmReporter};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

struct ConfigSlot {
    config: Arc<Config>,
    state: Mutex<ConfigState>,
    // Serializes start/stop of this config only.
    lifecycle: tokio::sync::Mutex<()>,
}

impl ConfigSlot {
    fn state(&self) -> ConfigState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConfigState) {
        *self.state.lock() = state;
    }
}

pub struct PluginManager {
    registry: PluginRegistry,
    containers: Arc<ContainerRegistry>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    alarms: AlarmReporter,
    configs: RwLock<HashMap<String, Arc<ConfigSlot>>>,
    live: RwLock<HashMap<i64, Arc<PipelineRunner>>>,
    keys: RwLock<SelectionKeys>,
}

impl PluginManager {
    pub fn new(
        registry: PluginRegistry,
        containers: Arc<ContainerRegistry>,
        runtime: Option<Arc<dyn ContainerRuntime>>,
        alarms: AlarmReporter,
    ) -> Self {
        Self {
            registry,
            containers,
            runtime,
            alarms,
            configs: RwLock::new(HashMap::new()),
            live: RwLock::new(HashMap::new()),
            keys: RwLock::new(SelectionKeys::new()),
        }
    }

    pub fn containers(&self) -> &Arc<ContainerRegistry> {
        &self.containers
    }

    pub fn runtime(&self) -> Option<&Arc<dyn ContainerRuntime>> {
        self.runtime.as_ref()
    }

    pub fn alarms(&self) -> &AlarmReporter {
        &self.alarms
    }

    /// Parses and validates a pipeline declaration and stores it as Loaded.
    pub fn load_config(
        &self,
        project: &str,
        logstore: &str,
        name: &str,
        key: i64,
        json: &str,
    ) -> Result<(), ManagerError> {
        let parse_error = |reason: String| ManagerError::Parse {
            config: name.to_string(),
            reason,
        };

        let spec = PipelineSpec::from_json(json).map_err(|e| parse_error(e.to_string()))?;
        if spec.aggregators.len() > 1 {
            return Err(parse_error(format!(
                "at most one aggregator may be declared, found {}",
                spec.aggregators.len()
            )));
        }
        self.validate_types(name, &spec)?;

        let rules = spec
            .inputs
            .iter()
            .filter_map(|decl| SelectionRule::from_detail(&decl.detail).transpose())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| parse_error(e.to_string()))?;

        let config = Config::new(
            project.to_string(),
            logstore.to_string(),
            name.to_string(),
            key,
            spec,
            rules,
        );

        let mut configs = self.configs.write();
        if configs.contains_key(name) || configs.values().any(|slot| slot.config.key == key) {
            return Err(ManagerError::DuplicateConfig {
                name: name.to_string(),
                key,
            });
        }
        configs.insert(
            name.to_string(),
            Arc::new(ConfigSlot {
                config: Arc::new(config),
                state: Mutex::new(ConfigState::Loaded),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        );
        drop(configs);

        info!(config = name, project, logstore, key, "Config loaded");
        Ok(())
    }

    fn validate_types(&self, name: &str, spec: &PipelineSpec) -> Result<(), ManagerError> {
        let groups: [(PluginKind, &[PluginDecl]); 4] = [
            (PluginKind::Input, spec.inputs.as_slice()),
            (PluginKind::Processor, spec.processors.as_slice()),
            (PluginKind::Aggregator, spec.aggregators.as_slice()),
            (PluginKind::Flusher, spec.flushers.as_slice()),
        ];
        for (kind, decls) in groups {
            if let Some(decl) = decls
                .iter()
                .find(|decl| !self.registry.contains(kind, &decl.type_name))
            {
                return Err(ManagerError::PluginInit {
                    config: name.to_string(),
                    plugin: decl.type_name.clone(),
                    reason: format!("no {kind:?} plugin registered under this type"),
                });
            }
        }
        Ok(())
    }

    fn slot(&self, name: &str) -> Result<Arc<ConfigSlot>, ManagerError> {
        self.configs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(name.to_string()))
    }

    /// Builds, initializes and starts the config's pipeline.
    pub async fn start_config(&self, name: &str) -> Result<(), ManagerError> {
        let slot = self.slot(name)?;
        let _lifecycle = slot.lifecycle.lock().await;

        let config = Arc::clone(&slot.config);
        if slot.state() == ConfigState::Running || self.live.read().contains_key(&config.key) {
            return Err(ManagerError::AlreadyRunning(name.to_string()));
        }

        let ctx = PluginContext {
            meta: config.meta(),
            global: config.spec.global.clone(),
            alarms: self.alarms.clone(),
            containers: Arc::clone(&self.containers),
            runtime: self.runtime.clone(),
        };

        let plugin_init = |plugin: &str, reason: String| {
            self.alarms.raise(
                AlarmKind::PluginInit,
                name,
                format!("plugin {plugin} failed to initialize: {reason}"),
            );
            ManagerError::PluginInit {
                config: name.to_string(),
                plugin: plugin.to_string(),
                reason,
            }
        };

        let runner = PipelineRunner::build(ctx, &config.spec, &self.registry)
            .await
            .map_err(|e| plugin_init(e.plugin(), e.to_string()))?;

        // Containers already on the host are not "new" to the watcher, so the
        // config matches them itself.
        if config.follows_containers() {
            let matched: Vec<String> = self
                .containers
                .snapshot()
                .into_iter()
                .filter(|c| config.matches_container(c))
                .map(|c| c.id)
                .collect();
            let recorded = self.containers.record_containers(&matched);
            info!(config = name, matched = matched.len(), recorded, "Initial container match");
        }

        if let Err(e) = runner.start().await {
            runner.stop().await;
            return Err(plugin_init(e.plugin(), e.to_string()));
        }

        self.live.write().insert(config.key, Arc::new(runner));
        slot.set_state(ConfigState::Running);
        {
            let mut keys = self.keys.write();
            for rule in config.rules() {
                keys.absorb_rule(rule);
            }
        }

        info!(config = name, key = config.key, "Config started");
        Ok(())
    }

    /// Drains and stops the config's pipeline. No-op unless running.
    pub async fn stop_config(&self, name: &str) -> Result<(), ManagerError> {
        let slot = self.slot(name)?;
        let _lifecycle = slot.lifecycle.lock().await;

        if slot.state() != ConfigState::Running {
            return Ok(());
        }

        let runner = self.live.write().remove(&slot.config.key);
        if let Some(runner) = runner {
            runner.stop().await;
        }
        slot.set_state(ConfigState::Stopped);

        info!(config = name, "Config stopped");
        Ok(())
    }

    /// Stops (if needed) and forgets the config, then rebuilds the key sets.
    pub async fn unload_config(&self, name: &str) -> Result<(), ManagerError> {
        self.stop_config(name).await?;
        self.configs.write().remove(name);
        self.refresh_env_and_label();
        info!(config = name, "Config unloaded");
        Ok(())
    }

    /// Stops then starts each distinct config once. Returns per-config errors.
    pub async fn restart_configs<I, S>(&self, names: I) -> Vec<ManagerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        let mut errors = Vec::new();

        for name in names {
            info!(config = %name, "Restarting config");
            let result = match self.stop_config(&name).await {
                Ok(()) => self.start_config(&name).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                self.alarms.raise(
                    AlarmKind::ConfigRestart,
                    &name,
                    format!("restart failed: {e}"),
                );
                errors.push(e);
            }
        }
        errors
    }

    /// Stops every running config concurrently. Returns false if `timeout`
    /// elapsed first.
    pub async fn stop_all(&self, timeout: Duration) -> bool {
        let names = self.running_config_names();
        if names.is_empty() {
            return true;
        }
        info!(count = names.len(), "Stopping all configs");

        let stops = join_all(names.iter().map(|name| self.stop_config(name)));
        match tokio::time::timeout(timeout, stops).await {
            Ok(results) => {
                for error in results.into_iter().filter_map(Result::err) {
                    warn!(config = error.config_name(), error = %error, "Stop failed");
                }
                true
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Timed out stopping configs");
                false
            }
        }
    }

    /// Appends tracked, not yet reported containers to the added report.
    pub fn record_containers(&self, ids: &[String]) -> usize {
        self.containers.record_containers(ids)
    }

    /// Rebuilds the key sets from the rules of every loaded config.
    pub fn refresh_env_and_label(&self) {
        let mut fresh = SelectionKeys::new();
        for slot in self.configs.read().values() {
            for rule in slot.config.rules() {
                fresh.absorb_rule(rule);
            }
        }
        *self.keys.write() = fresh;
    }

    /// Returns the keys referenced by loaded configs that the cached sets do
    /// not hold yet, and adds them to the sets.
    pub fn compare_env_and_label(&self) -> (BTreeSet<String>, BTreeSet<String>) {
        let mut diff_env = BTreeSet::new();
        let mut diff_label = BTreeSet::new();

        let configs: Vec<Arc<Config>> = self
            .configs
            .read()
            .values()
            .map(|slot| Arc::clone(&slot.config))
            .collect();

        let mut keys = self.keys.write();
        for config in &configs {
            for rule in config.rules() {
                for key in rule.env_keys() {
                    if keys.env.insert(key.to_string()) {
                        diff_env.insert(key.to_string());
                    }
                }
                for key in rule.label_keys() {
                    if keys.label.insert(key.to_string()) {
                        diff_label.insert(key.to_string());
                    }
                }
            }
        }
        (diff_env, diff_label)
    }

    /// Runs [`Self::compare_env_and_label`] and records every tracked
    /// container carrying one of the newly tracked keys.
    pub fn compare_and_record_containers(&self) -> usize {
        let (diff_env, diff_label) = self.compare_env_and_label();
        self.record_containers_with_keys(&diff_env, &diff_label)
    }

    pub(crate) fn record_containers_with_keys(
        &self,
        env_keys: &BTreeSet<String>,
        label_keys: &BTreeSet<String>,
    ) -> usize {
        if env_keys.is_empty() && label_keys.is_empty() {
            return 0;
        }
        let ids: Vec<String> = self
            .containers
            .snapshot()
            .into_iter()
            .filter(|c| {
                c.env.keys().any(|k| env_keys.contains(k))
                    || c.labels.keys().any(|k| label_keys.contains(k))
            })
            .map(|c| c.id)
            .collect();
        self.containers.record_containers(&ids)
    }

    pub fn selection_keys(&self) -> SelectionKeys {
        self.keys.read().clone()
    }

    pub fn extend_selection_keys<E, L>(&self, env: E, label: L)
    where
        E: IntoIterator<Item = String>,
        L: IntoIterator<Item = String>,
    {
        let mut keys = self.keys.write();
        keys.env.extend(env);
        keys.label.extend(label);
    }

    pub fn config(&self, name: &str) -> Option<Arc<Config>> {
        self.configs
            .read()
            .get(name)
            .map(|slot| Arc::clone(&slot.config))
    }

    pub fn config_state(&self, name: &str) -> Option<ConfigState> {
        self.configs.read().get(name).map(|slot| slot.state())
    }

    pub fn config_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn loaded_count(&self) -> usize {
        self.configs.read().len()
    }

    pub fn running_configs(&self) -> Vec<Arc<Config>> {
        self.configs
            .read()
            .values()
            .filter(|slot| slot.state() == ConfigState::Running)
            .map(|slot| Arc::clone(&slot.config))
            .collect()
    }

    fn running_config_names(&self) -> Vec<String> {
        self.running_configs()
            .iter()
            .map(|config| config.name.clone())
            .collect()
    }

    pub fn runner(&self, name: &str) -> Option<Arc<PipelineRunner>> {
        let key = self.configs.read().get(name)?.config.key;
        self.live.read().get(&key).cloned()
    }

    pub fn running_count(&self) -> usize {
        self.live.read().len()
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("configs", &self.config_names())
            .field("running", &self.running_count())
            .field("keys", &*self.keys.read())
            .finish()
    }
}
