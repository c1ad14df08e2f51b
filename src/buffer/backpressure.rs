use tokio::time::Duration;

/// What `receive_raw_log` does when the record buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Wait for free capacity, but never longer than the given bound.
    Block(Duration),
    /// Reject the record immediately.
    Drop,
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        BackpressurePolicy::Block(Duration::from_millis(1000))
    }
}

impl BackpressurePolicy {
    pub fn from_global(block_on_full: bool, receive_timeout: Duration) -> Self {
        if block_on_full {
            BackpressurePolicy::Block(receive_timeout)
        } else {
            BackpressurePolicy::Drop
        }
    }
}
