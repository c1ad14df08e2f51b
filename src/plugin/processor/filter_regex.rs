use crate::domain::LogRecord;
use crate::plugin::{PluginError, Processor, parse_detail};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FilterRegexDetail {
    #[serde(rename = "Include")]
    include: BTreeMap<String, String>,
}

/// Keeps records whose fields match every `Include` pattern. A record lacking
/// one of the fields is dropped.
#[derive(Debug)]
pub struct FilterRegexProcessor {
    include: Vec<(String, Regex)>,
}

impl FilterRegexProcessor {
    pub const TYPE: &'static str = "processor_filter_regex";

    pub fn from_detail(detail: &Value) -> Result<Self, PluginError> {
        let parsed: FilterRegexDetail = parse_detail(Self::TYPE, detail)?;
        let include = parsed
            .include
            .into_iter()
            .map(|(key, pattern)| {
                Regex::new(&pattern)
                    .map(|regex| (key.clone(), regex))
                    .map_err(|e| PluginError::InvalidDetail {
                        plugin: Self::TYPE.to_string(),
                        reason: format!("Include.{key}: {e}"),
                    })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { include })
    }

    fn keep(&self, record: &LogRecord) -> bool {
        self.include.iter().all(|(key, regex)| {
            record
                .field(key)
                .is_some_and(|value| regex.is_match(value))
        })
    }
}

impl Processor for FilterRegexProcessor {
    fn process(&self, records: Vec<LogRecord>) -> Vec<LogRecord> {
        records.into_iter().filter(|r| self.keep(r)).collect()
    }

    fn description(&self) -> &str {
        Self::TYPE
    }
}
