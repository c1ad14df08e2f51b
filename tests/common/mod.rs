#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use parking_lot::Mutex;
use rask_log_agent::collector::{
    ContainerRecord, ContainerRegistry, ContainerRuntime, ContainerSummary, LogLine, LogStream,
    RuntimeError,
};
use rask_log_agent::manager::PluginManager;
use rask_log_agent::plugin::PluginRegistry;
use rask_log_agent::plugin::flusher::{CheckerFlusher, CheckerHandle};
use rask_log_agent::plugin::Flusher;
use rask_log_agent::reliability::AlarmReporter;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory container engine. Containers and queued log lines are edited
/// directly by tests between watcher ticks.
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<Vec<ContainerRecord>>,
    lines: Mutex<HashMap<String, Vec<LogLine>>>,
    fail_listing: AtomicBool,
    inspections: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_containers(containers: Vec<ContainerRecord>) -> Self {
        let runtime = Self::new();
        *runtime.containers.lock() = containers;
        runtime
    }

    pub fn add(&self, record: ContainerRecord) {
        self.containers.lock().push(record);
    }

    pub fn remove(&self, id: &str) {
        self.containers.lock().retain(|c| c.id != id);
    }

    pub fn set_label(&self, id: &str, key: &str, value: &str) {
        if let Some(c) = self.containers.lock().iter_mut().find(|c| c.id == id) {
            c.labels.insert(key.to_string(), value.to_string());
        }
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn inspections(&self) -> usize {
        self.inspections.load(Ordering::SeqCst)
    }

    /// Lines handed out the next time the container's output is followed.
    pub fn queue_lines(&self, id: &str, lines: &[&str]) {
        let mut queued = self.lines.lock();
        let entry = queued.entry(id.to_string()).or_default();
        entry.extend(lines.iter().map(|content| LogLine {
            stream: LogStream::Stdout,
            content: content.to_string(),
            time: chrono::Utc::now(),
        }));
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable("daemon down".to_string()));
        }
        Ok(self
            .containers
            .lock()
            .iter()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.name.clone(),
                labels: c.labels.clone(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerRecord>, RuntimeError> {
        self.inspections.fetch_add(1, Ordering::SeqCst);
        Ok(self.containers.lock().iter().find(|c| c.id == id).cloned())
    }

    fn stream_logs(
        &self,
        id: &str,
        _stdout: bool,
        _stderr: bool,
    ) -> BoxStream<'static, Result<LogLine, RuntimeError>> {
        let lines = self.lines.lock().remove(id).unwrap_or_default();
        stream::iter(lines.into_iter().map(Ok))
            .chain(stream::pending())
            .boxed()
    }
}

/// Builtin plugins plus a `flusher_checker` whose counts the test can read.
pub fn registry_with_checker(handle: &CheckerHandle) -> PluginRegistry {
    let mut registry = PluginRegistry::with_builtins();
    let handle = handle.clone();
    registry.register_flusher(CheckerFlusher::TYPE, move |_| {
        Ok(Box::new(CheckerFlusher::with_handle(handle.clone())) as Box<dyn Flusher>)
    });
    registry
}

pub fn manager_with(
    registry: PluginRegistry,
    runtime: Option<Arc<dyn ContainerRuntime>>,
) -> Arc<PluginManager> {
    Arc::new(PluginManager::new(
        registry,
        Arc::new(ContainerRegistry::new()),
        runtime,
        AlarmReporter::new(),
    ))
}

/// Polls `condition` every 10ms until it holds or `within` elapses.
pub async fn wait_until<F>(within: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
