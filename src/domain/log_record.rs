use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single timestamped event as produced by an input.
///
/// Fields are kept in a sorted map so serialized output is stable across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub time: DateTime<Utc>,
    pub fields: BTreeMap<String, String>,
}

impl LogRecord {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time,
            fields: BTreeMap::new(),
        }
    }

    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Rough in-memory footprint, used for batch size accounting.
    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .fields
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}
