mod common;

use async_trait::async_trait;
use common::registry_with_checker;
use rask_log_agent::buffer::{BatchMeta, BufferError, LogBatch};
use rask_log_agent::collector::ContainerRegistry;
use rask_log_agent::domain::LogRecord;
use rask_log_agent::pipeline::{LogSink, PipelineRunner, RunnerState};
use rask_log_agent::plugin::flusher::CheckerHandle;
use rask_log_agent::plugin::{
    Flusher, Input, PipelineSpec, PluginContext, PluginError, PluginRegistry,
};
use rask_log_agent::reliability::{AlarmKind, AlarmReporter};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn context(spec: &PipelineSpec, alarms: &AlarmReporter) -> PluginContext {
    PluginContext {
        meta: BatchMeta {
            project: "prj".to_string(),
            logstore: "store".to_string(),
            config_name: "runner_test".to_string(),
            config_key: 9,
        },
        global: spec.global.clone(),
        alarms: alarms.clone(),
        containers: Arc::new(ContainerRegistry::new()),
        runtime: None,
    }
}

async fn build(
    spec: serde_json::Value,
    registry: &PluginRegistry,
) -> (Result<PipelineRunner, PluginError>, AlarmReporter) {
    let spec: PipelineSpec = serde_json::from_value(spec).unwrap();
    let alarms = AlarmReporter::new();
    let runner = PipelineRunner::build(context(&spec, &alarms), &spec, registry).await;
    (runner, alarms)
}

fn checker_spec(global: serde_json::Value) -> serde_json::Value {
    json!({
        "flushers": [{"type": "flusher_checker"}],
        "global": global,
    })
}

fn seq(i: usize) -> LogRecord {
    LogRecord::now().with_field("seq", i.to_string())
}

#[tokio::test]
async fn test_stop_delivers_every_buffered_record() {
    let handle = CheckerHandle::new();
    let registry = registry_with_checker(&handle);
    // Intervals far beyond the test: only the final drain can flush
    let (runner, alarms) = build(
        checker_spec(json!({"AggregatIntervalMs": 60000, "FlushIntervalMs": 60000})),
        &registry,
    )
    .await;
    let runner = runner.unwrap();
    runner.start().await.unwrap();
    assert_eq!(runner.state(), RunnerState::Running);

    for i in 0..37 {
        assert!(runner.receive_raw_log(seq(i)).await);
    }
    assert_eq!(handle.log_count(), 0);

    runner.stop().await;

    assert_eq!(runner.state(), RunnerState::Stopped);
    assert_eq!(handle.log_count(), 37);
    assert_eq!(runner.flushed_records(), 37);
    assert_eq!(handle.stop_count(), 1);
    assert_eq!(alarms.count(AlarmKind::DrainTimeout), 0);
}

#[tokio::test]
async fn test_records_keep_arrival_order() {
    let handle = CheckerHandle::capturing();
    let registry = registry_with_checker(&handle);
    let (runner, _) = build(
        checker_spec(json!({"DefaultLogQueueSize": 8, "AggregatIntervalMs": 50})),
        &registry,
    )
    .await;
    let runner = runner.unwrap();
    runner.start().await.unwrap();

    for i in 0..50 {
        assert!(runner.receive_raw_log(seq(i)).await);
    }
    runner.stop().await;

    let seen: Vec<String> = handle
        .records()
        .iter()
        .filter_map(|r| r.field("seq").map(str::to_string))
        .collect();
    let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
    assert_eq!(seen, expected);
    // Batches are capped at the record queue size
    assert!(runner.flushed_batches() >= 7);
}

#[tokio::test]
async fn test_drop_policy_rejects_when_full() {
    let handle = CheckerHandle::new();
    let registry = registry_with_checker(&handle);
    let (runner, _) = build(
        checker_spec(json!({"DefaultLogQueueSize": 2, "BlockOnFull": false})),
        &registry,
    )
    .await;
    // Not started: nothing drains the buffer
    let runner = runner.unwrap();

    assert!(runner.try_receive_raw_log(seq(0)).is_ok());
    assert!(runner.try_receive_raw_log(seq(1)).is_ok());
    assert_eq!(
        runner.try_receive_raw_log(seq(2)),
        Err(BufferError::BufferFull)
    );
    assert!(!runner.receive_raw_log(seq(3)).await);
    assert_eq!(runner.dropped_records(), 2);
}

#[tokio::test]
async fn test_blocking_policy_gives_up_after_receive_timeout() {
    let handle = CheckerHandle::new();
    let registry = registry_with_checker(&handle);
    let (runner, _) = build(
        checker_spec(json!({"DefaultLogQueueSize": 1, "ReceiveTimeoutMs": 50})),
        &registry,
    )
    .await;
    let runner = runner.unwrap();

    assert!(runner.receive_raw_log(seq(0)).await);
    let started = Instant::now();
    assert!(!runner.receive_raw_log(seq(1)).await);
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(runner.dropped_records(), 1);
}

#[tokio::test]
async fn test_rejects_records_after_stop() {
    let handle = CheckerHandle::new();
    let registry = registry_with_checker(&handle);
    let (runner, _) = build(checker_spec(json!({})), &registry).await;
    let runner = runner.unwrap();
    runner.start().await.unwrap();
    let sink = runner.sink();

    runner.stop().await;
    // Idempotent
    runner.stop().await;

    assert!(!sink.is_accepting());
    assert!(!runner.receive_raw_log(seq(0)).await);
    assert_eq!(
        runner.try_receive_raw_log(seq(1)),
        Err(BufferError::BufferClosed)
    );
    assert_eq!(handle.log_count(), 0);
    assert_eq!(handle.stop_count(), 1);
}

#[tokio::test]
async fn test_processors_apply_in_declaration_order() {
    let handle = CheckerHandle::capturing();
    let registry = registry_with_checker(&handle);
    let (runner, _) = build(
        json!({
            "processors": [
                {"type": "processor_add_fields", "detail": {"Fields": {"env": "prod"}}},
                {"type": "processor_filter_regex", "detail": {"Include": {"level": "^(warn|error)$"}}}
            ],
            "flushers": [{"type": "flusher_checker"}],
        }),
        &registry,
    )
    .await;
    let runner = runner.unwrap();
    runner.start().await.unwrap();

    for level in ["info", "warn", "debug", "error"] {
        runner
            .receive_raw_log(LogRecord::now().with_field("level", level))
            .await;
    }
    runner.stop().await;

    let records = handle.records();
    let levels: Vec<&str> = records.iter().filter_map(|r| r.field("level")).collect();
    assert_eq!(levels, vec!["warn", "error"]);
    assert!(records.iter().all(|r| r.field("env") == Some("prod")));
}

#[tokio::test]
async fn test_init_failure_rolls_back_initialized_plugins() {
    let handle = CheckerHandle::new();
    let registry = registry_with_checker(&handle);
    let (runner, _) = build(
        json!({
            "inputs": [{"type": "metric_container"}],
            "flushers": [
                {"type": "flusher_checker"},
                {"type": "flusher_stdout", "detail": {"FileName": "/definitely/missing/dir/out.log"}}
            ],
        }),
        &registry,
    )
    .await;

    let err = runner.err().unwrap();
    assert_eq!(err.plugin(), "flusher_stdout");
    assert_eq!(handle.stop_count(), 1);
}

#[tokio::test]
async fn test_second_aggregator_is_rejected() {
    let registry = PluginRegistry::with_builtins();
    let (runner, _) = build(
        json!({
            "aggregators": [{"type": "aggregator_default"}, {"type": "aggregator_default"}],
        }),
        &registry,
    )
    .await;
    assert!(matches!(runner, Err(PluginError::Init { .. })));
}

struct StuckFlusher;

#[async_trait]
impl Flusher for StuckFlusher {
    fn init(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    fn description(&self) -> &str {
        "flusher_stuck"
    }

    async fn flush(&self, _batch: Arc<LogBatch>) -> Result<(), PluginError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }

    async fn stop(&self, _timeout: Duration) -> Result<(), PluginError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_drain_timeout_aborts_and_raises_alarm() {
    let mut registry = PluginRegistry::new();
    registry.register_flusher("flusher_stuck", |_| {
        Ok(Box::new(StuckFlusher) as Box<dyn Flusher>)
    });
    let (runner, alarms) = build(
        json!({
            "flushers": [{"type": "flusher_stuck"}],
            "global": {"DrainTimeoutMs": 200, "AggregatIntervalMs": 60000},
        }),
        &registry,
    )
    .await;
    let runner = runner.unwrap();
    runner.start().await.unwrap();
    runner.receive_raw_log(seq(0)).await;

    let started = Instant::now();
    runner.stop().await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(runner.state(), RunnerState::Stopped);
    assert_eq!(alarms.count(AlarmKind::DrainTimeout), 1);
}

struct StuckInput;

#[async_trait]
impl Input for StuckInput {
    fn init(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    async fn start(&mut self, _sink: LogSink) -> Result<(), PluginError> {
        Ok(())
    }

    async fn stop(&mut self) {
        tokio::time::sleep(Duration::from_secs(30)).await;
    }

    fn description(&self) -> &str {
        "input_stuck"
    }
}

#[tokio::test]
async fn test_stalled_input_stop_is_bounded_by_drain_timeout() {
    let handle = CheckerHandle::new();
    let mut registry = registry_with_checker(&handle);
    registry.register_input("input_stuck", |_| Ok(Box::new(StuckInput) as Box<dyn Input>));
    let (runner, alarms) = build(
        json!({
            "inputs": [{"type": "input_stuck"}],
            "flushers": [{"type": "flusher_checker"}],
            "global": {"DrainTimeoutMs": 200},
        }),
        &registry,
    )
    .await;
    let runner = runner.unwrap();
    runner.start().await.unwrap();

    let started = Instant::now();
    runner.stop().await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(runner.state(), RunnerState::Stopped);
    assert_eq!(handle.stop_count(), 1);
    assert_eq!(alarms.count(AlarmKind::DrainTimeout), 1);
}
