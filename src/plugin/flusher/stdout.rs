use crate::buffer::LogBatch;
use crate::plugin::{Flusher, PluginContext, PluginError, parse_detail};
use crate::sender::{Converter, NdjsonConverter};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct StdoutDetail {
    #[serde(rename = "FileName")]
    file_name: Option<PathBuf>,
}

/// Writes records as NDJSON to stdout, or appends them to `FileName`.
#[derive(Debug)]
pub struct StdoutFlusher {
    file_name: Option<PathBuf>,
    converter: NdjsonConverter,
    // Serializes writers so lines from concurrent batches never interleave.
    write_lock: Mutex<()>,
}

impl StdoutFlusher {
    pub const TYPE: &'static str = "flusher_stdout";

    pub fn from_detail(detail: &Value) -> Result<Self, PluginError> {
        let parsed: StdoutDetail = parse_detail(Self::TYPE, detail)?;
        Ok(Self {
            file_name: parsed.file_name,
            converter: NdjsonConverter::new(false),
            write_lock: Mutex::new(()),
        })
    }

    async fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().await;
        match &self.file_name {
            Some(path) => {
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?;
                file.write_all(bytes).await?;
                file.flush().await
            }
            None => {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(bytes).await?;
                stdout.flush().await
            }
        }
    }
}

#[async_trait]
impl Flusher for StdoutFlusher {
    fn init(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        let missing_parent = self
            .file_name
            .as_ref()
            .and_then(|p| p.parent())
            .filter(|parent| !parent.as_os_str().is_empty() && !parent.exists());
        if let Some(parent) = missing_parent {
            return Err(PluginError::init(
                Self::TYPE,
                format!("directory does not exist: {}", parent.display()),
            ));
        }
        Ok(())
    }

    fn description(&self) -> &str {
        Self::TYPE
    }

    async fn flush(&self, batch: Arc<LogBatch>) -> Result<(), PluginError> {
        if batch.is_empty() {
            return Ok(());
        }
        let payload = self
            .converter
            .convert(&batch)
            .map_err(|e| PluginError::runtime(Self::TYPE, e))?;
        self.write(&payload.body)
            .await
            .map_err(|e| PluginError::runtime(Self::TYPE, e))
    }

    async fn stop(&self, _timeout: Duration) -> Result<(), PluginError> {
        Ok(())
    }
}
