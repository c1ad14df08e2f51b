use crate::buffer::LogBatch;
use crate::domain::LogRecord;
use crate::plugin::{Flusher, PluginContext, PluginError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Shared view into what a [`CheckerFlusher`] has received.
#[derive(Debug, Clone, Default)]
pub struct CheckerHandle {
    log_count: Arc<AtomicUsize>,
    batch_count: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
    captured: Option<Arc<Mutex<Vec<LogRecord>>>>,
}

impl CheckerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that also keeps every received record, in arrival order.
    pub fn capturing() -> Self {
        Self {
            captured: Some(Arc::new(Mutex::new(Vec::new()))),
            ..Self::default()
        }
    }

    pub fn log_count(&self) -> usize {
        self.log_count.load(Ordering::SeqCst)
    }

    pub fn batch_count(&self) -> usize {
        self.batch_count.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.captured
            .as_ref()
            .map(|records| records.lock().clone())
            .unwrap_or_default()
    }
}

/// Counts what it is given. Used to verify pipelines end to end.
#[derive(Debug, Default)]
pub struct CheckerFlusher {
    handle: CheckerHandle,
}

impl CheckerFlusher {
    pub const TYPE: &'static str = "flusher_checker";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handle(handle: CheckerHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> CheckerHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl Flusher for CheckerFlusher {
    fn init(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    fn description(&self) -> &str {
        Self::TYPE
    }

    async fn flush(&self, batch: Arc<LogBatch>) -> Result<(), PluginError> {
        if let Some(captured) = &self.handle.captured {
            captured.lock().extend(batch.records().iter().cloned());
        }
        self.handle
            .log_count
            .fetch_add(batch.size(), Ordering::SeqCst);
        self.handle.batch_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _timeout: Duration) -> Result<(), PluginError> {
        self.handle.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
