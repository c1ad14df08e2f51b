use crate::buffer::LogBatch;
use crate::plugin::{Flusher, PluginContext, PluginError, parse_detail};
use crate::reliability::{AlarmKind, AlarmReporter, RetryConfig};
use crate::sender::{
    ClientConfig, Converter, DeliveryConfig, DeliveryEngine, DeliveryStatsSnapshot, HttpTransport,
    NdjsonConverter, Transport,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushProtocol {
    #[default]
    Ndjson,
    Otlp,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct HttpFlusherDetail {
    #[serde(rename = "RemoteURL")]
    remote_url: String,
    #[serde(rename = "Protocol")]
    protocol: FlushProtocol,
    #[serde(rename = "Workers")]
    workers: usize,
    #[serde(rename = "QueueSize")]
    queue_size: usize,
    #[serde(rename = "MaxAttempts")]
    max_attempts: u32,
    #[serde(rename = "RetryDelayMs")]
    retry_delay_ms: u64,
    #[serde(rename = "TimeoutMs")]
    timeout_ms: u64,
    #[serde(rename = "Compression")]
    compression: bool,
    #[serde(rename = "Headers")]
    headers: BTreeMap<String, String>,
}

impl Default for HttpFlusherDetail {
    fn default() -> Self {
        Self {
            remote_url: String::new(),
            protocol: FlushProtocol::Ndjson,
            workers: 4,
            queue_size: 16,
            max_attempts: 6,
            retry_delay_ms: 30_000,
            timeout_ms: 5_000,
            compression: false,
            headers: BTreeMap::new(),
        }
    }
}

struct Running {
    config_name: String,
    engine: DeliveryEngine,
    alarms: AlarmReporter,
}

/// Converts each batch and posts it through a dedicated [`DeliveryEngine`].
pub struct HttpFlusher {
    detail: HttpFlusherDetail,
    converter: Option<Arc<dyn Converter>>,
    transport: Option<Arc<dyn Transport>>,
    running: Option<Running>,
}

impl HttpFlusher {
    pub const TYPE: &'static str = "flusher_http";

    pub fn from_detail(detail: &Value) -> Result<Self, PluginError> {
        Ok(Self {
            detail: parse_detail(Self::TYPE, detail)?,
            converter: None,
            transport: None,
            running: None,
        })
    }

    /// Overrides the converter chosen from `Protocol`. Must precede `init`.
    pub fn with_converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Overrides the HTTP transport built from `RemoteURL`. Must precede `init`.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn delivery_stats(&self) -> Option<DeliveryStatsSnapshot> {
        self.running.as_ref().map(|r| r.engine.stats())
    }

    fn build_converter(&self) -> Result<Arc<dyn Converter>, PluginError> {
        match self.detail.protocol {
            FlushProtocol::Ndjson => Ok(Arc::new(NdjsonConverter::new(self.detail.compression))),
            #[cfg(feature = "otlp")]
            FlushProtocol::Otlp => Ok(Arc::new(crate::sender::OtlpConverter::new())),
            #[cfg(not(feature = "otlp"))]
            FlushProtocol::Otlp => Err(PluginError::init(
                Self::TYPE,
                "Protocol otlp requires the `otlp` feature",
            )),
        }
    }

    fn build_transport(&self) -> Result<Arc<dyn Transport>, PluginError> {
        let transport = HttpTransport::new(ClientConfig {
            endpoint: self.detail.remote_url.clone(),
            timeout: Duration::from_millis(self.detail.timeout_ms.max(1)),
            headers: self.detail.headers.clone(),
            ..ClientConfig::default()
        })
        .map_err(|e| PluginError::init(Self::TYPE, e))?;
        Ok(Arc::new(transport))
    }
}

#[async_trait]
impl Flusher for HttpFlusher {
    fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        if self.detail.remote_url.trim().is_empty() && self.transport.is_none() {
            return Err(PluginError::init(Self::TYPE, "RemoteURL is required"));
        }

        let converter = match self.converter.take() {
            Some(converter) => converter,
            None => self.build_converter()?,
        };
        let transport = match self.transport.take() {
            Some(transport) => transport,
            None => self.build_transport()?,
        };

        let config = DeliveryConfig {
            workers: self.detail.workers.max(1),
            queue_size: self.detail.queue_size.max(1),
            retry: RetryConfig::fixed(
                self.detail.max_attempts.max(1),
                Duration::from_millis(self.detail.retry_delay_ms),
            ),
        };
        let engine = DeliveryEngine::start(
            ctx.config_name(),
            config,
            transport,
            ctx.alarms.clone(),
        )
        .map_err(|e| PluginError::init(Self::TYPE, e))?;

        self.converter = Some(converter);
        self.running = Some(Running {
            config_name: ctx.config_name().to_string(),
            engine,
            alarms: ctx.alarms.clone(),
        });
        Ok(())
    }

    fn description(&self) -> &str {
        Self::TYPE
    }

    fn is_ready(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| r.engine.available_capacity() > 0)
    }

    async fn flush(&self, batch: Arc<LogBatch>) -> Result<(), PluginError> {
        let (Some(running), Some(converter)) = (&self.running, &self.converter) else {
            return Err(PluginError::runtime(Self::TYPE, "flush before init"));
        };
        if batch.is_empty() {
            return Ok(());
        }

        // An unencodable batch fails only itself.
        let payload = match converter.convert(&batch) {
            Ok(payload) => payload,
            Err(e) => {
                running.alarms.raise(
                    AlarmKind::DeliveryRejected,
                    &running.config_name,
                    format!("dropping batch {}: {} conversion failed: {e}", batch.id(), converter.name()),
                );
                return Err(PluginError::runtime(Self::TYPE, e));
            }
        };

        running
            .engine
            .enqueue(payload)
            .await
            .map_err(|e| PluginError::runtime(Self::TYPE, e))
    }

    async fn stop(&self, timeout: Duration) -> Result<(), PluginError> {
        let Some(running) = &self.running else {
            return Ok(());
        };
        let abandoned = running.engine.stop(timeout).await;
        if abandoned > 0 {
            return Err(PluginError::runtime(
                Self::TYPE,
                format!("abandoned {abandoned} queued payload(s) at shutdown"),
            ));
        }
        Ok(())
    }
}
