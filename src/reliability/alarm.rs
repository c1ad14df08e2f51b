//! Operator-visible failure channel.
//!
//! Alarms are keyed by config name and kept in a bounded in-memory ring so a
//! host process (or a test) can inspect what went wrong without scraping logs.
//! Every alarm is also emitted as a structured `tracing` error.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlarmKind {
    PluginInit,
    DeliveryExhausted,
    DeliveryRejected,
    DrainTimeout,
    ContainerList,
    ConfigRestart,
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlarmKind::PluginInit => "PLUGIN_INIT_ALARM",
            AlarmKind::DeliveryExhausted => "DELIVERY_EXHAUSTED_ALARM",
            AlarmKind::DeliveryRejected => "DELIVERY_REJECTED_ALARM",
            AlarmKind::DrainTimeout => "DRAIN_TIMEOUT_ALARM",
            AlarmKind::ContainerList => "CONTAINER_LIST_ALARM",
            AlarmKind::ConfigRestart => "CONFIG_RESTART_ALARM",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alarm {
    pub kind: AlarmKind,
    pub config_name: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AlarmReporter {
    alarms: Arc<Mutex<VecDeque<Alarm>>>,
    capacity: usize,
}

impl AlarmReporter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            alarms: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity: capacity.max(1),
        }
    }

    pub fn raise(&self, kind: AlarmKind, config_name: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(alarm = %kind, config = config_name, "{}", message);

        let mut alarms = self.alarms.lock();
        if alarms.len() >= self.capacity {
            alarms.pop_front();
        }
        alarms.push_back(Alarm {
            kind,
            config_name: config_name.to_string(),
            message,
            raised_at: Utc::now(),
        });
    }

    pub fn snapshot(&self) -> Vec<Alarm> {
        self.alarms.lock().iter().cloned().collect()
    }

    pub fn count(&self, kind: AlarmKind) -> usize {
        self.alarms.lock().iter().filter(|a| a.kind == kind).count()
    }

    pub fn drain(&self) -> Vec<Alarm> {
        self.alarms.lock().drain(..).collect()
    }
}

impl Default for AlarmReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AlarmReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlarmReporter")
            .field("pending", &self.alarms.lock().len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
