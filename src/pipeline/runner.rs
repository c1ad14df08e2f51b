//! One running config: inputs → bounded record buffer → aggregation task →
//! bounded batch queue → flush task → flushers.

use super::sink::LogSink;
use crate::buffer::{BackpressurePolicy, BatchMeta, BatchType, LogBatch};
use crate::domain::LogRecord;
use crate::plugin::aggregator::DefaultAggregator;
use crate::plugin::{
    Aggregator, Flusher, Input, PipelineSpec, PluginContext, PluginError, PluginRegistry,
    Processor,
};
use crate::reliability::AlarmKind;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const HOSTNAME_TAG: &str = "__hostname__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Created,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Default)]
struct RunnerStats {
    batches: AtomicU64,
    records: AtomicU64,
    flush_errors: AtomicU64,
}

pub struct PipelineRunner {
    ctx: PluginContext,
    state: Mutex<RunnerState>,
    inputs: tokio::sync::Mutex<Vec<Box<dyn Input>>>,
    processors: Arc<Vec<Box<dyn Processor>>>,
    aggregator: Mutex<Option<Box<dyn Aggregator>>>,
    flushers: Arc<Vec<Arc<dyn Flusher>>>,
    sink: LogSink,
    accepting: Arc<AtomicBool>,
    record_rx: Mutex<Option<mpsc::Receiver<LogRecord>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    tags: BTreeMap<String, String>,
    stats: Arc<RunnerStats>,
}

impl PipelineRunner {
    /// Instantiates and initializes every declared plugin. The first failure
    /// stops whatever was already initialized and is returned.
    pub async fn build(
        ctx: PluginContext,
        spec: &PipelineSpec,
        registry: &PluginRegistry,
    ) -> Result<Self, PluginError> {
        let mut inputs: Vec<Box<dyn Input>> = Vec::with_capacity(spec.inputs.len());
        let mut flushers: Vec<Arc<dyn Flusher>> = Vec::with_capacity(spec.flushers.len());

        let built = Self::build_plugins(&ctx, spec, registry, &mut inputs, &mut flushers);
        let (processors, aggregator) = match built {
            Ok(parts) => parts,
            Err(e) => {
                warn!(config = %ctx.config_name(), plugin = e.plugin(), error = %e, "Plugin init failed, rolling back");
                for input in &mut inputs {
                    input.stop().await;
                }
                let drain = ctx.global.drain_timeout();
                join_all(flushers.iter().map(|f| f.stop(drain))).await;
                return Err(e);
            }
        };

        if flushers.is_empty() {
            warn!(config = %ctx.config_name(), "Pipeline has no flushers; batches will be discarded");
        }

        let (tx, rx) = mpsc::channel(ctx.global.log_queue_size());
        let accepting = Arc::new(AtomicBool::new(true));
        let policy = BackpressurePolicy::from_global(
            ctx.global.block_on_full,
            ctx.global.receive_timeout(),
        );
        let sink = LogSink::new(tx, Arc::clone(&accepting), policy);

        let mut tags = ctx.global.tags.clone();
        if let Some(host) = hostname::get().ok().and_then(|h| h.into_string().ok()) {
            tags.entry(HOSTNAME_TAG.to_string()).or_insert(host);
        }

        Ok(Self {
            ctx,
            state: Mutex::new(RunnerState::Created),
            inputs: tokio::sync::Mutex::new(inputs),
            processors: Arc::new(processors),
            aggregator: Mutex::new(Some(aggregator)),
            flushers: Arc::new(flushers),
            sink,
            accepting,
            record_rx: Mutex::new(Some(rx)),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            tags,
            stats: Arc::new(RunnerStats::default()),
        })
    }

    #[allow(clippy::type_complexity)]
    fn build_plugins(
        ctx: &PluginContext,
        spec: &PipelineSpec,
        registry: &PluginRegistry,
        inputs: &mut Vec<Box<dyn Input>>,
        flushers: &mut Vec<Arc<dyn Flusher>>,
    ) -> Result<(Vec<Box<dyn Processor>>, Box<dyn Aggregator>), PluginError> {
        for decl in &spec.inputs {
            let mut input = registry.create_input(decl)?;
            input.init(ctx)?;
            inputs.push(input);
        }

        let mut processors = Vec::with_capacity(spec.processors.len());
        for decl in &spec.processors {
            let mut processor = registry.create_processor(decl)?;
            processor.init(ctx)?;
            processors.push(processor);
        }

        let mut aggregator = match spec.aggregators.as_slice() {
            [] => Box::new(DefaultAggregator::from_detail(&Value::Null)?) as Box<dyn Aggregator>,
            [decl] => registry.create_aggregator(decl)?,
            [_, second, ..] => {
                return Err(PluginError::init(
                    &second.type_name,
                    "at most one aggregator may be declared",
                ));
            }
        };
        aggregator.init(ctx)?;

        for decl in &spec.flushers {
            let mut flusher = registry.create_flusher(decl)?;
            let init = flusher.init(ctx);
            // Initialized or not, it may own resources that stop releases.
            flushers.push(Arc::from(flusher));
            init?;
        }

        Ok((processors, aggregator))
    }

    pub fn config_name(&self) -> &str {
        self.ctx.config_name()
    }

    pub fn state(&self) -> RunnerState {
        *self.state.lock()
    }

    pub fn flusher_count(&self) -> usize {
        self.flushers.len()
    }

    pub fn flusher_descriptions(&self) -> Vec<String> {
        self.flushers
            .iter()
            .map(|f| f.description().to_string())
            .collect()
    }

    /// Handle for producers outside the runner's own inputs.
    pub fn sink(&self) -> LogSink {
        self.sink.clone()
    }

    pub async fn receive_raw_log(&self, record: LogRecord) -> bool {
        self.sink.receive_raw_log(record).await
    }

    pub fn try_receive_raw_log(&self, record: LogRecord) -> Result<(), crate::buffer::BufferError> {
        self.sink.try_receive_raw_log(record)
    }

    pub fn flushed_records(&self) -> u64 {
        self.stats.records.load(Ordering::Relaxed)
    }

    pub fn flushed_batches(&self) -> u64 {
        self.stats.batches.load(Ordering::Relaxed)
    }

    pub fn dropped_records(&self) -> u64 {
        self.sink.dropped()
    }

    pub async fn start(&self) -> Result<(), PluginError> {
        let (rx, aggregator) = {
            let mut state = self.state.lock();
            if *state != RunnerState::Created {
                return Err(PluginError::runtime(
                    self.config_name(),
                    format!("cannot start runner in state {:?}", *state),
                ));
            }
            let rx = self.record_rx.lock().take();
            let aggregator = self.aggregator.lock().take();
            let (Some(rx), Some(aggregator)) = (rx, aggregator) else {
                return Err(PluginError::runtime(self.config_name(), "runner already consumed"));
            };
            *state = RunnerState::Running;
            (rx, aggregator)
        };

        let (batch_tx, batch_rx) = mpsc::channel(self.ctx.global.batch_queue_size());

        let aggregation = AggregationTask {
            meta: self.ctx.meta.clone(),
            tags: self.tags.clone(),
            interval: self.ctx.global.aggregate_interval(),
            processors: Arc::clone(&self.processors),
            aggregator,
            batch_tx,
            cancel: self.cancel.clone(),
        };
        let flush = FlushTask {
            config_name: self.config_name().to_string(),
            flushers: Arc::clone(&self.flushers),
            flush_interval: self.ctx.global.flush_interval(),
            stats: Arc::clone(&self.stats),
        };

        {
            let mut tasks = self.tasks.lock();
            tasks.push(tokio::spawn(aggregation.run(rx)));
            tasks.push(tokio::spawn(flush.run(batch_rx)));
        }

        let mut inputs = self.inputs.lock().await;
        for input in &mut *inputs {
            input.start(self.sink.clone()).await?;
        }

        info!(
            config = %self.config_name(),
            inputs = inputs.len(),
            processors = self.processors.len(),
            flushers = self.flushers.len(),
            "Pipeline started"
        );
        Ok(())
    }

    /// Stops accepting records, flushes everything buffered as a final
    /// batch and gives flushers `DrainTimeoutMs` to finish. Idempotent.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                RunnerState::Draining | RunnerState::Stopped => return,
                RunnerState::Created | RunnerState::Running => *state = RunnerState::Draining,
            }
        }
        self.accepting.store(false, Ordering::Release);

        let deadline = Instant::now() + self.ctx.global.drain_timeout();

        let inputs_stopped = timeout_at(deadline, async {
            let mut inputs = self.inputs.lock().await;
            for input in &mut *inputs {
                input.stop().await;
            }
        })
        .await
        .is_ok();
        if !inputs_stopped {
            warn!(config = %self.config_name(), "Inputs did not stop before the drain deadline");
        }

        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let tasks_joined = timeout_at(deadline, join_all(tasks)).await.is_ok();
        let mut timed_out = !(inputs_stopped && tasks_joined);
        if timed_out {
            for handle in aborts {
                handle.abort();
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let results = join_all(self.flushers.iter().map(|f| f.stop(remaining))).await;
        for (flusher, result) in self.flushers.iter().zip(results) {
            if let Err(e) = result {
                warn!(config = %self.config_name(), flusher = flusher.description(), error = %e, "Flusher did not drain cleanly");
                timed_out = true;
            }
        }

        if timed_out {
            self.ctx.alarms.raise(
                AlarmKind::DrainTimeout,
                self.config_name(),
                format!(
                    "pipeline drain exceeded {}ms; remaining work aborted",
                    self.ctx.global.drain_timeout_ms
                ),
            );
        }

        *self.state.lock() = RunnerState::Stopped;
        info!(
            config = %self.config_name(),
            records = self.flushed_records(),
            batches = self.flushed_batches(),
            dropped = self.dropped_records(),
            "Pipeline stopped"
        );
    }
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("config", &self.config_name())
            .field("state", &self.state())
            .field("flushers", &self.flusher_descriptions())
            .finish()
    }
}

struct AggregationTask {
    meta: BatchMeta,
    tags: BTreeMap<String, String>,
    interval: Duration,
    processors: Arc<Vec<Box<dyn Processor>>>,
    aggregator: Box<dyn Aggregator>,
    batch_tx: mpsc::Sender<Arc<LogBatch>>,
    cancel: CancellationToken,
}

impl AggregationTask {
    async fn run(mut self, mut rx: mpsc::Receiver<LogRecord>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    let Some(record) = maybe else { break };
                    if let Some(group) = self.aggregator.add(record) {
                        if !self.emit(group, BatchType::SizeBased).await {
                            return;
                        }
                        // The interval counts from the last emitted batch
                        ticker.reset();
                    }
                }
                _ = ticker.tick() => {
                    let group = self.aggregator.flush();
                    if !self.emit(group, BatchType::TimeBased).await {
                        return;
                    }
                }
                _ = self.cancel.cancelled() => {
                    rx.close();
                    while let Some(record) = rx.recv().await {
                        if let Some(group) = self.aggregator.add(record)
                            && !self.emit(group, BatchType::SizeBased).await
                        {
                            return;
                        }
                    }
                    break;
                }
            }
        }

        let rest = self.aggregator.flush();
        self.emit(rest, BatchType::Drain).await;
        debug!(config = %self.meta.config_name, "Aggregation task finished");
    }

    /// Returns false once the flush side is gone.
    async fn emit(&self, group: Vec<LogRecord>, batch_type: BatchType) -> bool {
        if group.is_empty() {
            return true;
        }
        let records = self
            .processors
            .iter()
            .fold(group, |records, processor| processor.process(records));
        if records.is_empty() {
            return true;
        }

        let batch = LogBatch::new(self.meta.clone(), self.tags.clone(), records, batch_type);
        self.batch_tx.send(Arc::new(batch)).await.is_ok()
    }
}

struct FlushTask {
    config_name: String,
    flushers: Arc<Vec<Arc<dyn Flusher>>>,
    flush_interval: Duration,
    stats: Arc<RunnerStats>,
}

impl FlushTask {
    async fn run(self, mut batch_rx: mpsc::Receiver<Arc<LogBatch>>) {
        while let Some(batch) = batch_rx.recv().await {
            let results = join_all(self.flushers.iter().map(|flusher| {
                let batch = Arc::clone(&batch);
                let interval = self.flush_interval;
                async move {
                    while !flusher.is_ready() {
                        tokio::time::sleep(interval).await;
                    }
                    flusher.flush(batch).await
                }
            }))
            .await;

            for (flusher, result) in self.flushers.iter().zip(results) {
                if let Err(e) = result {
                    self.stats.flush_errors.fetch_add(1, Ordering::Relaxed);
                    error!(
                        config = %self.config_name,
                        flusher = flusher.description(),
                        batch_id = %batch.id(),
                        error = %e,
                        "Flush failed"
                    );
                }
            }
            self.stats.batches.fetch_add(1, Ordering::Relaxed);
            self.stats
                .records
                .fetch_add(batch.size() as u64, Ordering::Relaxed);
        }
        debug!(config = %self.config_name, "Flush task finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregation_task(
        interval: Duration,
        max_log_count: usize,
    ) -> (AggregationTask, mpsc::Receiver<Arc<LogBatch>>) {
        let (batch_tx, batch_rx) = mpsc::channel(16);
        let aggregator =
            DefaultAggregator::from_detail(&serde_json::json!({"MaxLogCount": max_log_count}))
                .unwrap();
        let task = AggregationTask {
            meta: BatchMeta {
                project: "prj".to_string(),
                logstore: "store".to_string(),
                config_name: "aggregation".to_string(),
                config_key: 1,
            },
            tags: BTreeMap::new(),
            interval,
            processors: Arc::new(Vec::new()),
            aggregator: Box::new(aggregator),
            batch_tx,
            cancel: CancellationToken::new(),
        };
        (task, batch_rx)
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_aggregation_future_is_send() {
        let (task, _batches) = aggregation_task(Duration::from_millis(100), 3);
        let (_tx, rx) = mpsc::channel(1);
        let run = task.run(rx);
        assert_send(&run);
    }

    #[tokio::test]
    async fn test_size_flush_restarts_aggregation_interval() {
        let started = Instant::now();
        let (task, mut batches) = aggregation_task(Duration::from_millis(300), 3);
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(task.run(rx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        for i in 0..4 {
            tx.send(LogRecord::now().with_field("seq", i.to_string()))
                .await
                .unwrap();
        }
        let full = batches.recv().await.unwrap();
        assert_eq!(full.size(), 3);
        assert_eq!(full.batch_type(), BatchType::SizeBased);

        // Past the original 300ms tick: the size flush at 200ms moved it
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(batches.try_recv().is_err());

        let timed = tokio::time::timeout(Duration::from_secs(2), batches.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(timed.size(), 1);
        assert_eq!(timed.batch_type(), BatchType::TimeBased);
        assert!(started.elapsed() >= Duration::from_millis(450));

        drop(tx);
        handle.await.unwrap();
    }
}
