pub mod backpressure;
pub mod batch;
pub mod error;

pub use backpressure::BackpressurePolicy;
pub use batch::{BatchMeta, BatchType, LogBatch};
pub use error::BufferError;
