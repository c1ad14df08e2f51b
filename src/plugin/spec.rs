//! Parsed pipeline declarations.
//!
//! ```json
//! { "inputs": [{"type": "service_docker_stdout", "detail": {...}}],
//!   "processors": [], "aggregators": [], "flushers": [],
//!   "global": {"InputIntervalMs": 1000, "Tags": {"k": "v"}} }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSpec {
    pub inputs: Vec<PluginDecl>,
    pub processors: Vec<PluginDecl>,
    pub aggregators: Vec<PluginDecl>,
    pub flushers: Vec<PluginDecl>,
    pub global: GlobalConfig,
}

impl PipelineSpec {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDecl {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub detail: Value,
}

impl PluginDecl {
    pub fn new(type_name: impl Into<String>, detail: Value) -> Self {
        Self {
            type_name: type_name.into(),
            detail,
        }
    }
}

/// Pipeline-wide settings. Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    #[serde(rename = "InputIntervalMs")]
    pub input_interval_ms: u64,
    #[serde(rename = "AggregatIntervalMs")]
    pub aggregate_interval_ms: u64,
    #[serde(rename = "FlushIntervalMs")]
    pub flush_interval_ms: u64,
    #[serde(rename = "DefaultLogQueueSize")]
    pub default_log_queue_size: usize,
    #[serde(rename = "DefaultLogGroupQueueSize")]
    pub default_log_group_queue_size: usize,
    #[serde(rename = "Tags")]
    pub tags: BTreeMap<String, String>,
    #[serde(rename = "AlwaysOnline")]
    pub always_online: bool,
    #[serde(rename = "ReceiveTimeoutMs")]
    pub receive_timeout_ms: u64,
    #[serde(rename = "BlockOnFull")]
    pub block_on_full: bool,
    #[serde(rename = "DrainTimeoutMs")]
    pub drain_timeout_ms: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            input_interval_ms: 1000,
            aggregate_interval_ms: 3000,
            flush_interval_ms: 3000,
            default_log_queue_size: 1000,
            default_log_group_queue_size: 4,
            tags: BTreeMap::new(),
            always_online: false,
            receive_timeout_ms: 1000,
            block_on_full: true,
            drain_timeout_ms: 5000,
        }
    }
}

// Zero intervals would spin; they are clamped to 1ms.
fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms.max(1))
}

impl GlobalConfig {
    pub fn input_interval(&self) -> Duration {
        millis(self.input_interval_ms)
    }

    pub fn aggregate_interval(&self) -> Duration {
        millis(self.aggregate_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        millis(self.flush_interval_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn log_queue_size(&self) -> usize {
        self.default_log_queue_size.max(1)
    }

    pub fn batch_queue_size(&self) -> usize {
        self.default_log_group_queue_size.max(1)
    }
}
