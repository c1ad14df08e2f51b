//! Bounded, retrying delivery of encoded payloads.
//!
//! A fixed pool of workers pulls [`DeliveryTask`]s from one bounded queue.
//! Recoverable failures are retried with the configured delay until the
//! attempt budget is spent; non-recoverable failures end the task at once.
//! Every terminal failure raises an alarm for the owning config.

use super::client::Transport;
use super::error::DeliveryError;
use super::task::{DeliveryTask, Payload};
use crate::reliability::{AlarmKind, AlarmReporter, RetryConfig, RetryError, RetryPolicy};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub workers: usize,
    pub queue_size: usize,
    pub retry: RetryConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 16,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct DeliveryStats {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    attempts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStatsSnapshot {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub retries: u64,
    pub attempts: u64,
}

impl DeliveryStatsSnapshot {
    /// Tasks accepted but not yet terminated.
    pub fn pending(&self) -> u64 {
        self.enqueued
            .saturating_sub(self.delivered)
            .saturating_sub(self.failed)
    }
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
        }
    }
}

struct Worker {
    config_name: String,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    stats: Arc<DeliveryStats>,
    alarms: AlarmReporter,
    abort: CancellationToken,
}

impl Worker {
    async fn run(self, queue: Arc<tokio::sync::Mutex<mpsc::Receiver<DeliveryTask>>>) {
        loop {
            let next = { queue.lock().await.recv().await };
            let Some(task) = next else {
                break;
            };
            self.deliver(task).await;
        }
    }

    async fn deliver(&self, mut task: DeliveryTask) {
        loop {
            task.attempts += 1;
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            let error = match self.transport.send(&task.payload).await {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        config = %self.config_name,
                        task_id = %task.id,
                        attempts = task.attempts,
                        queued_ms = task.enqueued_at.elapsed().as_millis() as u64,
                        "Delivery succeeded"
                    );
                    return;
                }
                Err(error) => error,
            };

            if !error.is_recoverable() {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.alarms.raise(
                    AlarmKind::DeliveryRejected,
                    &self.config_name,
                    format!(
                        "dropping batch {} after non-recoverable failure to {}: {error}",
                        task.payload.batch_id,
                        self.transport.endpoint()
                    ),
                );
                return;
            }

            if self.policy.should_give_up(task.attempts) {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.alarms.raise(
                    AlarmKind::DeliveryExhausted,
                    &self.config_name,
                    format!(
                        "dropping batch {} after {} attempts to {}: {error}",
                        task.payload.batch_id,
                        task.attempts,
                        self.transport.endpoint()
                    ),
                );
                return;
            }

            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            let delay = self.policy.delay();
            warn!(
                config = %self.config_name,
                task_id = %task.id,
                attempt = task.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Delivery failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.abort.cancelled() => return,
            }
        }
    }
}

pub struct DeliveryEngine {
    config_name: String,
    sender: RwLock<Option<mpsc::Sender<DeliveryTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<DeliveryStats>,
    alarms: AlarmReporter,
    abort: CancellationToken,
}

impl DeliveryEngine {
    /// Spawns the worker pool. Must be called inside a tokio runtime.
    pub fn start(
        config_name: impl Into<String>,
        config: DeliveryConfig,
        transport: Arc<dyn Transport>,
        alarms: AlarmReporter,
    ) -> Result<Self, RetryError> {
        let config_name = config_name.into();
        let policy = RetryPolicy::new(config.retry)?;
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let queue = Arc::new(tokio::sync::Mutex::new(rx));
        let stats = Arc::new(DeliveryStats::default());
        let abort = CancellationToken::new();

        let workers = (0..config.workers.max(1))
            .map(|_| {
                let worker = Worker {
                    config_name: config_name.clone(),
                    transport: Arc::clone(&transport),
                    policy: policy.clone(),
                    stats: Arc::clone(&stats),
                    alarms: alarms.clone(),
                    abort: abort.clone(),
                };
                tokio::spawn(worker.run(Arc::clone(&queue)))
            })
            .collect();

        info!(
            config = %config_name,
            endpoint = transport.endpoint(),
            workers = config.workers.max(1),
            queue_size = config.queue_size.max(1),
            "Delivery engine started"
        );

        Ok(Self {
            config_name,
            sender: RwLock::new(Some(tx)),
            workers: Mutex::new(workers),
            stats,
            alarms,
            abort,
        })
    }

    /// Waits while the queue is full. Fails with `QueueClosed` once stop began.
    pub async fn enqueue(&self, payload: Payload) -> Result<(), DeliveryError> {
        let sender = self
            .sender
            .read()
            .clone()
            .ok_or(DeliveryError::QueueClosed)?;

        sender
            .send(DeliveryTask::new(payload))
            .await
            .map_err(|_| DeliveryError::QueueClosed)?;
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_accepting(&self) -> bool {
        self.sender.read().is_some()
    }

    /// Room left in the queue; zero once stopped.
    pub fn available_capacity(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map(|s| s.capacity())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }

    /// Refuses new work, lets workers finish everything already queued and
    /// joins them. Workers still busy at `timeout` are aborted. Returns the
    /// number of tasks that were abandoned.
    pub async fn stop(&self, timeout: Duration) -> u64 {
        // Dropping the last sender lets workers observe end-of-queue.
        drop(self.sender.write().take());
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return 0;
        }

        let aborts: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();
        let joined = tokio::time::timeout(timeout, futures::future::join_all(workers)).await;

        if joined.is_ok() {
            info!(config = %self.config_name, "Delivery engine drained");
            return 0;
        }

        self.abort.cancel();
        for handle in aborts {
            handle.abort();
        }
        let abandoned = self.stats.snapshot().pending();
        self.alarms.raise(
            AlarmKind::DrainTimeout,
            &self.config_name,
            format!(
                "delivery drain exceeded {}ms, abandoned {abandoned} task(s)",
                timeout.as_millis()
            ),
        );
        abandoned
    }
}

impl std::fmt::Debug for DeliveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("config_name", &self.config_name)
            .field("accepting", &self.is_accepting())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
