use crate::domain::LogRecord;
use crate::plugin::{Aggregator, PluginContext, PluginError, parse_detail};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DefaultAggregatorDetail {
    #[serde(rename = "MaxLogCount")]
    max_log_count: Option<usize>,
}

/// Groups records in arrival order and emits a group every `MaxLogCount`
/// records. Time-based emission is driven by the runner.
#[derive(Debug)]
pub struct DefaultAggregator {
    max_log_count: usize,
    configured: Option<usize>,
    pending: Vec<LogRecord>,
}

impl DefaultAggregator {
    pub const TYPE: &'static str = "aggregator_default";

    pub fn from_detail(detail: &Value) -> Result<Self, PluginError> {
        let parsed: DefaultAggregatorDetail = parse_detail(Self::TYPE, detail)?;
        if parsed.max_log_count == Some(0) {
            return Err(PluginError::InvalidDetail {
                plugin: Self::TYPE.to_string(),
                reason: "MaxLogCount must be greater than 0".to_string(),
            });
        }
        Ok(Self {
            max_log_count: parsed.max_log_count.unwrap_or(1),
            configured: parsed.max_log_count,
            pending: Vec::new(),
        })
    }

    pub fn max_log_count(&self) -> usize {
        self.max_log_count
    }
}

impl Aggregator for DefaultAggregator {
    fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        self.max_log_count = self
            .configured
            .unwrap_or_else(|| ctx.global.log_queue_size());
        self.pending = Vec::with_capacity(self.max_log_count.min(4096));
        Ok(())
    }

    fn add(&mut self, record: LogRecord) -> Option<Vec<LogRecord>> {
        self.pending.push(record);
        if self.pending.len() >= self.max_log_count {
            Some(self.flush())
        } else {
            None
        }
    }

    fn flush(&mut self) -> Vec<LogRecord> {
        std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.max_log_count.min(4096)),
        )
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }

    fn description(&self) -> &str {
        Self::TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_emits_on_threshold() {
        let mut aggregator = DefaultAggregator::from_detail(&json!({"MaxLogCount": 3})).unwrap();
        assert!(aggregator.add(LogRecord::now()).is_none());
        assert!(aggregator.add(LogRecord::now()).is_none());
        let group = aggregator.add(LogRecord::now()).unwrap();
        assert_eq!(group.len(), 3);
        assert_eq!(aggregator.pending(), 0);
    }

    #[test]
    fn test_flush_returns_partial_group() {
        let mut aggregator = DefaultAggregator::from_detail(&json!({"MaxLogCount": 10})).unwrap();
        aggregator.add(LogRecord::now().with_field("seq", "1"));
        let group = aggregator.flush();
        assert_eq!(group.len(), 1);
        assert!(aggregator.flush().is_empty());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        assert!(DefaultAggregator::from_detail(&json!({"MaxLogCount": 0})).is_err());
    }
}
