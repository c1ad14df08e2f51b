use thiserror::Error;

/// Top-level error type for the agent process.
///
/// Subsystems keep their own error enums; this one is what the binary edge sees.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::app::ConfigError),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::app::LoggingError),

    #[error("Container runtime error: {0}")]
    Runtime(#[from] crate::collector::RuntimeError),

    #[error("Pipeline error: {0}")]
    Manager(#[from] crate::manager::ManagerError),

    #[error("Shutdown error: {0}")]
    Shutdown(String),
}
