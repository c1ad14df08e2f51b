use crate::domain::LogRecord;
use crate::plugin::{PluginContext, PluginError, Processor, parse_detail};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct AddFieldsDetail {
    #[serde(rename = "Fields")]
    fields: BTreeMap<String, String>,
    #[serde(rename = "IgnoreIfExist")]
    ignore_if_exist: bool,
}

/// Adds constant fields to every record.
#[derive(Debug)]
pub struct AddFieldsProcessor {
    detail: AddFieldsDetail,
}

impl AddFieldsProcessor {
    pub const TYPE: &'static str = "processor_add_fields";

    pub fn from_detail(detail: &Value) -> Result<Self, PluginError> {
        Ok(Self {
            detail: parse_detail(Self::TYPE, detail)?,
        })
    }
}

impl Processor for AddFieldsProcessor {
    fn init(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        if self.detail.fields.is_empty() {
            return Err(PluginError::init(Self::TYPE, "Fields must not be empty"));
        }
        Ok(())
    }

    fn process(&self, mut records: Vec<LogRecord>) -> Vec<LogRecord> {
        for record in &mut records {
            for (key, value) in &self.detail.fields {
                if self.detail.ignore_if_exist && record.fields.contains_key(key) {
                    continue;
                }
                record.set_field(key.clone(), value.clone());
            }
        }
        records
    }

    fn description(&self) -> &str {
        Self::TYPE
    }
}
