pub mod runner;
pub mod sink;

pub use runner::{PipelineRunner, RunnerState};
pub use sink::LogSink;
