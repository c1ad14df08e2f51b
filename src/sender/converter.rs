use super::task::Payload;
use crate::buffer::LogBatch;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

// Upper bound on the initial buffer reservation for one payload.
const MAX_INITIAL_CAPACITY: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error during serialization: {0}")]
    Io(#[from] std::io::Error),
    #[error("Batch is empty")]
    EmptyBatch,
    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// Turns a batch into a wire payload.
#[cfg_attr(test, automock)]
pub trait Converter: Send + Sync {
    fn convert(&self, batch: &LogBatch) -> Result<Payload, ConvertError>;

    fn name(&self) -> &'static str;
}

#[derive(Serialize)]
struct NdjsonLine<'a> {
    time: String,
    project: &'a str,
    logstore: &'a str,
    config: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    tags: &'a BTreeMap<String, String>,
    fields: &'a BTreeMap<String, String>,
}

/// One JSON object per record, newline separated, optionally gzip-compressed.
#[derive(Debug, Clone, Default)]
pub struct NdjsonConverter {
    compress: bool,
}

impl NdjsonConverter {
    pub fn new(compress: bool) -> Self {
        Self { compress }
    }

    fn serialize(&self, batch: &LogBatch) -> Result<Vec<u8>, ConvertError> {
        let meta = batch.meta();
        let capacity = batch.estimated_memory_size().min(MAX_INITIAL_CAPACITY);
        let mut buffer = Vec::with_capacity(capacity);

        for record in batch.records() {
            let line = NdjsonLine {
                time: record.time.to_rfc3339(),
                project: &meta.project,
                logstore: &meta.logstore,
                config: &meta.config_name,
                tags: batch.tags(),
                fields: &record.fields,
            };
            serde_json::to_writer(&mut buffer, &line)?;
            buffer.write_all(b"\n")?;
        }
        Ok(buffer)
    }
}

impl Converter for NdjsonConverter {
    fn convert(&self, batch: &LogBatch) -> Result<Payload, ConvertError> {
        if batch.is_empty() {
            return Err(ConvertError::EmptyBatch);
        }

        let body = self.serialize(batch)?;
        let payload = if self.compress {
            let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 4), Compression::fast());
            encoder.write_all(&body)?;
            Payload::new(batch.id(), encoder.finish()?, "application/x-ndjson").with_encoding("gzip")
        } else {
            Payload::new(batch.id(), body, "application/x-ndjson")
        };

        Ok(payload.with_record_count(batch.size()))
    }

    fn name(&self) -> &'static str {
        "ndjson"
    }
}
