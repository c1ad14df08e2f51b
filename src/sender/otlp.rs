//! OTLP (OpenTelemetry Protocol) encoding for log batches.
//!
//! One `ResourceLogs` per batch: the resource carries the pipeline identity
//! and batch tags, each record becomes an OTLP `LogRecord` whose body is the
//! `content` field and whose attributes are the remaining fields.

use super::converter::{ConvertError, Converter};
use super::task::Payload;
use crate::buffer::LogBatch;
use crate::domain::LogRecord;

use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::common::v1::{AnyValue, InstrumentationScope, KeyValue, any_value};
use opentelemetry_proto::tonic::logs::v1::{LogRecord as OtlpLogRecord, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::resource::v1::Resource;

use prost::Message;

const SCOPE_NAME: &str = "rask-log-agent";
const BODY_FIELD: &str = "content";

#[derive(Debug, Clone)]
pub struct OtlpConverter {
    agent_version: String,
}

impl OtlpConverter {
    pub fn new() -> Self {
        Self {
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn create_resource_logs(&self, batch: &LogBatch) -> ResourceLogs {
        let meta = batch.meta();
        let mut attributes = vec![
            string_kv("service.name", &meta.logstore),
            string_kv("service.namespace", &meta.project),
            string_kv("rask.config.name", &meta.config_name),
            int_kv("rask.config.key", meta.config_key),
            string_kv("telemetry.sdk.name", SCOPE_NAME),
            string_kv("telemetry.sdk.version", &self.agent_version),
        ];
        attributes.extend(batch.tags().iter().map(|(k, v)| string_kv(k, v)));

        let log_records = batch
            .records()
            .iter()
            .map(|record| self.create_log_record(record))
            .collect();

        ResourceLogs {
            resource: Some(Resource {
                attributes,
                dropped_attributes_count: 0,
                entity_refs: vec![],
            }),
            scope_logs: vec![ScopeLogs {
                scope: Some(InstrumentationScope {
                    name: SCOPE_NAME.to_string(),
                    version: self.agent_version.clone(),
                    attributes: vec![],
                    dropped_attributes_count: 0,
                }),
                log_records,
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }
    }

    fn create_log_record(&self, record: &LogRecord) -> OtlpLogRecord {
        let time_unix_nano = record.time.timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
        let observed_time_unix_nano = chrono::Utc::now()
            .timestamp_nanos_opt()
            .map(|n| n.max(0) as u64)
            .unwrap_or(time_unix_nano);

        let (severity_number, severity_text) = map_severity(record.field("level"));

        let body = record.field(BODY_FIELD).map(|content| AnyValue {
            value: Some(any_value::Value::StringValue(content.to_string())),
        });

        let attributes = record
            .fields
            .iter()
            .filter(|(key, _)| key.as_str() != BODY_FIELD)
            .map(|(key, value)| string_kv(key, value))
            .collect();

        let trace_id = record
            .field("trace_id")
            .and_then(|id| hex::decode(id).ok())
            .unwrap_or_default();
        let span_id = record
            .field("span_id")
            .and_then(|id| hex::decode(id).ok())
            .unwrap_or_default();

        OtlpLogRecord {
            time_unix_nano,
            observed_time_unix_nano,
            severity_number,
            severity_text,
            body,
            attributes,
            dropped_attributes_count: 0,
            flags: 0,
            trace_id,
            span_id,
            event_name: String::new(),
        }
    }
}

impl Default for OtlpConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter for OtlpConverter {
    fn convert(&self, batch: &LogBatch) -> Result<Payload, ConvertError> {
        if batch.is_empty() {
            return Err(ConvertError::EmptyBatch);
        }

        let request = ExportLogsServiceRequest {
            resource_logs: vec![self.create_resource_logs(batch)],
        };

        let mut buf = Vec::with_capacity(request.encoded_len());
        request
            .encode(&mut buf)
            .map_err(|e| ConvertError::Encode(e.to_string()))?;

        Ok(Payload::new(batch.id(), buf, "application/x-protobuf").with_record_count(batch.size()))
    }

    fn name(&self) -> &'static str {
        "otlp"
    }
}

fn string_kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

fn int_kv(key: &str, value: i64) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::IntValue(value)),
        }),
    }
}

/// OTel severity numbers: 1-4 TRACE, 5-8 DEBUG, 9-12 INFO, 13-16 WARN,
/// 17-20 ERROR, 21-24 FATAL.
fn map_severity(level: Option<&str>) -> (i32, String) {
    let Some(level) = level else {
        return (0, "UNSPECIFIED".to_string());
    };
    match level.to_ascii_lowercase().as_str() {
        "trace" => (1, "TRACE".to_string()),
        "debug" => (5, "DEBUG".to_string()),
        "info" | "information" => (9, "INFO".to_string()),
        "warn" | "warning" => (13, "WARN".to_string()),
        "error" | "err" => (17, "ERROR".to_string()),
        "fatal" | "critical" | "panic" => (21, "FATAL".to_string()),
        _ => (0, "UNSPECIFIED".to_string()),
    }
}
