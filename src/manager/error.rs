use thiserror::Error;

/// Failures of lifecycle operations. Every variant names the config it
/// belongs to; one config's error never affects another.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagerError {
    #[error("config {config}: parse error: {reason}")]
    Parse { config: String, reason: String },
    #[error("config {name} (key {key}) conflicts with a loaded config")]
    DuplicateConfig { name: String, key: i64 },
    #[error("config {0} not found")]
    NotFound(String),
    #[error("config {0} is already running")]
    AlreadyRunning(String),
    #[error("config {config}: plugin {plugin} failed to initialize: {reason}")]
    PluginInit {
        config: String,
        plugin: String,
        reason: String,
    },
}

impl ManagerError {
    pub fn config_name(&self) -> &str {
        match self {
            ManagerError::Parse { config, .. } | ManagerError::PluginInit { config, .. } => config,
            ManagerError::DuplicateConfig { name, .. } => name,
            ManagerError::NotFound(name) | ManagerError::AlreadyRunning(name) => name,
        }
    }
}
