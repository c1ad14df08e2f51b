use crate::domain::LogRecord;
use crate::pipeline::LogSink;
use crate::plugin::{Input, PluginContext, PluginError};
use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;

/// Emits one record per tracked container every `InputIntervalMs`.
pub struct MetricContainerInput {
    ctx: Option<PluginContext>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MetricContainerInput {
    pub const TYPE: &'static str = "metric_container";

    pub fn from_detail(_detail: &Value) -> Result<Self, PluginError> {
        Ok(Self {
            ctx: None,
            cancel: CancellationToken::new(),
            task: None,
        })
    }
}

#[async_trait]
impl Input for MetricContainerInput {
    fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    async fn start(&mut self, sink: LogSink) -> Result<(), PluginError> {
        let ctx = self
            .ctx
            .clone()
            .ok_or_else(|| PluginError::runtime(Self::TYPE, "started before init"))?;
        let cancel = self.cancel.clone();

        self.task = Some(tokio::spawn(async move {
            let period = ctx.global.input_interval();
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                for container in ctx.containers.snapshot() {
                    let record = LogRecord::now()
                        .with_field("container_id", container.id)
                        .with_field("container_name", container.name)
                        .with_field("env_count", container.env.len().to_string())
                        .with_field("label_count", container.labels.len().to_string());
                    if !sink.receive_raw_log(record).await && !sink.is_accepting() {
                        return;
                    }
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn description(&self) -> &str {
        Self::TYPE
    }
}
