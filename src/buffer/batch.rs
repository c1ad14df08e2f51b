use crate::domain::LogRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchType {
    /// The aggregator reached its record threshold.
    SizeBased,
    /// The aggregation interval elapsed.
    TimeBased,
    /// Final batch flushed while the pipeline drains.
    Drain,
}

/// Identity of the pipeline a batch belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMeta {
    pub project: String,
    pub logstore: String,
    pub config_name: String,
    pub config_key: i64,
}

#[derive(Debug, Clone)]
pub struct LogBatch {
    id: String,
    meta: BatchMeta,
    tags: BTreeMap<String, String>,
    records: Vec<LogRecord>,
    batch_type: BatchType,
    created_at: DateTime<Utc>,
}

impl LogBatch {
    pub fn new(
        meta: BatchMeta,
        tags: BTreeMap<String, String>,
        records: Vec<LogRecord>,
        batch_type: BatchType,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            meta,
            tags,
            records,
            batch_type,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn meta(&self) -> &BatchMeta {
        &self.meta
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<LogRecord> {
        self.records
    }

    pub fn batch_type(&self) -> BatchType {
        self.batch_type
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn estimated_memory_size(&self) -> usize {
        self.records.iter().map(LogRecord::estimated_size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_meta(config_name: &str) -> BatchMeta {
    BatchMeta {
        project: "test_prj".to_string(),
        logstore: "test_logstore".to_string(),
        config_name: config_name.to_string(),
        config_key: 666,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_keeps_record_order() {
        let records: Vec<LogRecord> = (0..5)
            .map(|i| LogRecord::now().with_field("seq", i.to_string()))
            .collect();
        let batch = LogBatch::new(
            test_meta("cfg"),
            BTreeMap::new(),
            records,
            BatchType::SizeBased,
        );

        let seqs: Vec<&str> = batch
            .records()
            .iter()
            .filter_map(|r| r.field("seq"))
            .collect();
        assert_eq!(seqs, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(batch.size(), 5);
        assert!(!batch.is_empty());
        assert_eq!(batch.meta().config_name, "cfg");
    }

    #[test]
    fn test_batch_ids_are_unique() {
        let a = LogBatch::new(test_meta("a"), BTreeMap::new(), vec![], BatchType::Drain);
        let b = LogBatch::new(test_meta("a"), BTreeMap::new(), vec![], BatchType::Drain);
        assert_ne!(a.id(), b.id());
        assert!(a.is_empty());
    }
}
