//! Plugin contracts and the built-in plugin catalogue.
//!
//! A pipeline is assembled from four plugin kinds: inputs produce records,
//! processors rewrite batches, the aggregator groups records into batches and
//! flushers hand batches to a destination. Each kind is a trait object built
//! by a factory looked up by name in [`PluginRegistry`].

pub mod aggregator;
pub mod flusher;
pub mod input;
pub mod processor;
pub mod registry;
pub mod spec;

use crate::buffer::{BatchMeta, LogBatch};
use crate::collector::{ContainerRegistry, ContainerRuntime, SelectionRule};
use crate::domain::LogRecord;
use crate::pipeline::LogSink;
use crate::reliability::AlarmReporter;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use registry::{PluginKind, PluginRegistry};
pub use spec::{GlobalConfig, PipelineSpec, PluginDecl};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("unknown plugin type: {0}")]
    UnknownType(String),
    #[error("invalid detail for {plugin}: {reason}")]
    InvalidDetail { plugin: String, reason: String },
    #[error("{plugin} failed to initialize: {reason}")]
    Init { plugin: String, reason: String },
    #[error("{plugin} failed: {reason}")]
    Runtime { plugin: String, reason: String },
}

impl PluginError {
    pub fn init(plugin: &str, reason: impl ToString) -> Self {
        PluginError::Init {
            plugin: plugin.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn runtime(plugin: &str, reason: impl ToString) -> Self {
        PluginError::Runtime {
            plugin: plugin.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn plugin(&self) -> &str {
        match self {
            PluginError::UnknownType(name) => name,
            PluginError::InvalidDetail { plugin, .. }
            | PluginError::Init { plugin, .. }
            | PluginError::Runtime { plugin, .. } => plugin,
        }
    }
}

/// Deserializes a plugin's `detail`; `null` yields the detail's defaults.
pub fn parse_detail<T>(plugin: &str, detail: &Value) -> Result<T, PluginError>
where
    T: DeserializeOwned + Default,
{
    if detail.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(detail.clone()).map_err(|e| PluginError::InvalidDetail {
        plugin: plugin.to_string(),
        reason: e.to_string(),
    })
}

/// Everything a plugin may need from its hosting pipeline.
#[derive(Clone)]
pub struct PluginContext {
    pub meta: BatchMeta,
    pub global: GlobalConfig,
    pub alarms: AlarmReporter,
    pub containers: Arc<ContainerRegistry>,
    pub runtime: Option<Arc<dyn ContainerRuntime>>,
}

impl PluginContext {
    pub fn config_name(&self) -> &str {
        &self.meta.config_name
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("meta", &self.meta)
            .field("global", &self.global)
            .field("containers", &self.containers.len())
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

#[async_trait]
pub trait Input: Send + Sync {
    fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError>;

    /// Spawns the input's workers. Records go through `sink`; order is kept
    /// per worker.
    async fn start(&mut self, sink: LogSink) -> Result<(), PluginError>;

    /// Stops and joins every worker started by [`Input::start`].
    async fn stop(&mut self);

    fn description(&self) -> &str;

    /// Container selection rule, for inputs that follow containers.
    fn selection(&self) -> Option<&SelectionRule> {
        None
    }
}

pub trait Processor: Send + Sync {
    fn init(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    fn process(&self, records: Vec<LogRecord>) -> Vec<LogRecord>;

    fn description(&self) -> &str;
}

pub trait Aggregator: Send + Sync {
    fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError>;

    /// Buffers a record; returns a full group once the size threshold is hit.
    fn add(&mut self, record: LogRecord) -> Option<Vec<LogRecord>>;

    /// Takes whatever is buffered.
    fn flush(&mut self) -> Vec<LogRecord>;

    fn pending(&self) -> usize;

    fn description(&self) -> &str;
}

#[async_trait]
pub trait Flusher: Send + Sync {
    fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError>;

    fn description(&self) -> &str;

    /// False while the destination cannot take another batch.
    fn is_ready(&self) -> bool {
        true
    }

    async fn flush(&self, batch: Arc<LogBatch>) -> Result<(), PluginError>;

    /// Drains buffered work within `timeout`.
    async fn stop(&self, timeout: Duration) -> Result<(), PluginError>;
}
