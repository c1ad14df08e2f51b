use crate::buffer::{BackpressurePolicy, BufferError};
use crate::domain::LogRecord;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Cloneable entry point into a runner's bounded record buffer.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::Sender<LogRecord>,
    accepting: Arc<AtomicBool>,
    policy: BackpressurePolicy,
    dropped: Arc<AtomicU64>,
}

impl LogSink {
    pub(crate) fn new(
        tx: mpsc::Sender<LogRecord>,
        accepting: Arc<AtomicBool>,
        policy: BackpressurePolicy,
    ) -> Self {
        Self {
            tx,
            accepting,
            policy,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Offers a record to the pipeline. Returns false when the record was not
    /// accepted: the pipeline is stopping, the buffer stayed full past the
    /// receive timeout, or the buffer was full under the drop policy.
    pub async fn receive_raw_log(&self, record: LogRecord) -> bool {
        if !self.is_accepting() {
            return false;
        }

        let accepted = match self.policy {
            BackpressurePolicy::Block(timeout) if !timeout.is_zero() => {
                matches!(
                    tokio::time::timeout(timeout, self.tx.send(record)).await,
                    Ok(Ok(()))
                )
            }
            _ => self.tx.try_send(record).is_ok(),
        };

        if !accepted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    /// Non-blocking variant usable from synchronous code.
    pub fn try_receive_raw_log(&self, record: LogRecord) -> Result<(), BufferError> {
        if !self.is_accepting() {
            return Err(BufferError::BufferClosed);
        }
        self.tx.try_send(record).map_err(|e| {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                TrySendError::Full(_) => BufferError::BufferFull,
                TrySendError::Closed(_) => BufferError::BufferClosed,
            }
        })
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Records refused by this sink and its clones.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("accepting", &self.is_accepting())
            .field("policy", &self.policy)
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sink(capacity: usize, policy: BackpressurePolicy) -> (LogSink, mpsc::Receiver<LogRecord>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel(capacity);
        let accepting = Arc::new(AtomicBool::new(true));
        (LogSink::new(tx, Arc::clone(&accepting), policy), rx, accepting)
    }

    #[tokio::test]
    async fn test_drop_policy_rejects_when_full() {
        let (sink, _rx, _) = sink(1, BackpressurePolicy::Drop);
        assert!(sink.receive_raw_log(LogRecord::now()).await);
        assert!(!sink.receive_raw_log(LogRecord::now()).await);
        assert_eq!(sink.dropped(), 1);
    }

    #[tokio::test]
    async fn test_block_policy_times_out() {
        let (sink, _rx, _) = sink(1, BackpressurePolicy::Block(Duration::from_millis(20)));
        assert!(sink.receive_raw_log(LogRecord::now()).await);
        assert!(!sink.receive_raw_log(LogRecord::now()).await);
    }

    #[tokio::test]
    async fn test_block_policy_waits_for_room() {
        let (sink, mut rx, _) = sink(1, BackpressurePolicy::Block(Duration::from_secs(5)));
        assert!(sink.receive_raw_log(LogRecord::now()).await);

        let consumer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            rx.recv().await;
            rx
        });
        assert!(sink.receive_raw_log(LogRecord::now()).await);
        let _rx = consumer.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_after_stop_began() {
        let (sink, _rx, accepting) = sink(4, BackpressurePolicy::default());
        accepting.store(false, Ordering::Release);
        assert!(!sink.receive_raw_log(LogRecord::now()).await);
        assert_eq!(
            sink.try_receive_raw_log(LogRecord::now()),
            Err(BufferError::BufferClosed)
        );
    }

    #[test]
    fn test_try_receive_full() {
        let (sink, _rx, _) = sink(1, BackpressurePolicy::Drop);
        sink.try_receive_raw_log(LogRecord::now()).unwrap();
        assert_eq!(
            sink.try_receive_raw_log(LogRecord::now()),
            Err(BufferError::BufferFull)
        );
    }
}
