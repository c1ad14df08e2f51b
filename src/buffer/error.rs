use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BufferError {
    #[error("Buffer is closed")]
    BufferClosed,

    #[error("Buffer is full")]
    BufferFull,

    #[error("Send timeout")]
    SendTimeout,
}
