use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Worth another attempt: transport failures, timeouts, 5xx, 408, 429.
    #[error("Recoverable delivery failure: {0}")]
    Recoverable(String),
    #[error("Non-recoverable delivery failure: {0}")]
    NonRecoverable(String),
    #[error("Delivery queue is closed")]
    QueueClosed,
}

impl DeliveryError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DeliveryError::Recoverable(_))
    }
}
