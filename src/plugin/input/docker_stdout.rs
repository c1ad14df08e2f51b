use crate::collector::{ContainerRecord, ContainerRegistry, ContainerRuntime, SelectionRule};
use crate::domain::LogRecord;
use crate::pipeline::LogSink;
use crate::plugin::{Input, PluginContext, PluginError, parse_detail};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct DockerStdoutDetail {
    #[serde(rename = "Stdout")]
    stdout: bool,
    #[serde(rename = "Stderr")]
    stderr: bool,
}

impl Default for DockerStdoutDetail {
    fn default() -> Self {
        Self {
            stdout: true,
            stderr: true,
        }
    }
}

struct Started {
    ctx: PluginContext,
    runtime: Arc<dyn ContainerRuntime>,
}

/// Tails stdout/stderr of every tracked container matching the selection
/// rule, one worker per container.
pub struct DockerStdoutInput {
    detail: DockerStdoutDetail,
    rule: Option<SelectionRule>,
    started: Option<Started>,
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl DockerStdoutInput {
    pub const TYPE: &'static str = "service_docker_stdout";

    pub fn from_detail(detail: &Value) -> Result<Self, PluginError> {
        let parsed: DockerStdoutDetail = parse_detail(Self::TYPE, detail)?;
        let rule =
            SelectionRule::from_detail(detail).map_err(|e| PluginError::InvalidDetail {
                plugin: Self::TYPE.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            detail: parsed,
            rule,
            started: None,
            cancel: CancellationToken::new(),
            supervisor: None,
        })
    }
}

#[async_trait]
impl Input for DockerStdoutInput {
    fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        if !self.detail.stdout && !self.detail.stderr {
            return Err(PluginError::init(
                Self::TYPE,
                "at least one of Stdout or Stderr must be enabled",
            ));
        }
        let runtime = ctx
            .runtime
            .clone()
            .ok_or_else(|| PluginError::init(Self::TYPE, "no container runtime available"))?;
        self.started = Some(Started {
            ctx: ctx.clone(),
            runtime,
        });
        Ok(())
    }

    async fn start(&mut self, sink: LogSink) -> Result<(), PluginError> {
        let started = self
            .started
            .as_ref()
            .ok_or_else(|| PluginError::runtime(Self::TYPE, "started before init"))?;

        let supervisor = Supervisor {
            config_name: started.ctx.config_name().to_string(),
            containers: Arc::clone(&started.ctx.containers),
            runtime: Arc::clone(&started.runtime),
            rule: self.rule.clone(),
            stdout: self.detail.stdout,
            stderr: self.detail.stderr,
            interval: started.ctx.global.input_interval(),
            sink,
            cancel: self.cancel.clone(),
            workers: HashMap::new(),
        };
        self.supervisor = Some(tokio::spawn(supervisor.run()));
        Ok(())
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.supervisor.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "docker stdout supervisor ended abnormally");
        }
    }

    fn description(&self) -> &str {
        Self::TYPE
    }

    fn selection(&self) -> Option<&SelectionRule> {
        self.rule.as_ref()
    }
}

struct TailWorker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Supervisor {
    config_name: String,
    containers: Arc<ContainerRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    rule: Option<SelectionRule>,
    stdout: bool,
    stderr: bool,
    interval: Duration,
    sink: LogSink,
    cancel: CancellationToken,
    workers: HashMap<String, TailWorker>,
}

impl Supervisor {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        let containers = Arc::clone(&self.containers);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = containers.wait_for_added() => {}
            }
            if !self.sink.is_accepting() {
                break;
            }
            self.reconcile();
        }

        for (_, worker) in self.workers.drain() {
            worker.cancel.cancel();
            let _ = worker.handle.await;
        }
        debug!(config = %self.config_name, "docker stdout supervisor stopped");
    }

    fn reconcile(&mut self) {
        let matched: HashMap<String, ContainerRecord> = self
            .containers
            .snapshot()
            .into_iter()
            .filter(|c| {
                self.rule
                    .as_ref()
                    .is_none_or(|rule| rule.matches(&c.env, &c.labels))
            })
            .map(|c| (c.id.clone(), c))
            .collect();

        self.workers.retain(|id, worker| {
            let keep = matched.contains_key(id) && !worker.handle.is_finished();
            if !keep {
                worker.cancel.cancel();
            }
            keep
        });

        for (id, container) in matched {
            if self.workers.contains_key(&id) {
                continue;
            }
            info!(
                config = %self.config_name,
                container_id = %id,
                container_name = %container.name,
                "Tailing container output"
            );
            let cancel = self.cancel.child_token();
            let handle = tokio::spawn(tail_container(
                Arc::clone(&self.runtime),
                container,
                self.stdout,
                self.stderr,
                self.sink.clone(),
                cancel.clone(),
            ));
            self.workers.insert(id, TailWorker { cancel, handle });
        }
    }
}

async fn tail_container(
    runtime: Arc<dyn ContainerRuntime>,
    container: ContainerRecord,
    stdout: bool,
    stderr: bool,
    sink: LogSink,
    cancel: CancellationToken,
) {
    let mut stream = runtime.stream_logs(&container.id, stdout, stderr);
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    warn!(container_id = %container.id, error = %e, "Log stream failed");
                    break;
                }
                None => break,
            },
        };

        let record = LogRecord::new(line.time)
            .with_field("content", line.content)
            .with_field("_source_", line.stream.as_str())
            .with_field("_container_id_", container.id.as_str())
            .with_field("_container_name_", container.name.as_str());

        if !sink.receive_raw_log(record).await && !sink.is_accepting() {
            break;
        }
    }
    debug!(container_id = %container.id, "Stopped tailing container");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detail_defaults_and_rule() {
        let input = DockerStdoutInput::from_detail(&json!({
            "Stderr": false,
            "IncludeLabel": {"app": "^.*$"}
        }))
        .unwrap();
        assert!(input.detail.stdout);
        assert!(!input.detail.stderr);
        assert_eq!(input.selection().unwrap().label_keys().count(), 1);
    }

    #[test]
    fn test_invalid_regex_is_invalid_detail() {
        let err = DockerStdoutInput::from_detail(&json!({"IncludeEnv": {"x": "["}}))
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::InvalidDetail { .. }));
    }
}
