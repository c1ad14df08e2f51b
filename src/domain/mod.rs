//! Domain layer for rask-log-agent.
//!
//! Contains the canonical types shared across all modules:
//! - `LogRecord`: a single event flowing from inputs into aggregation
//! - `AgentError`: top-level error type seen by the binary

pub mod error;
pub mod log_record;

pub use error::AgentError;
pub use log_record::LogRecord;
