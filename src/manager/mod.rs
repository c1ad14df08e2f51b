pub mod config;
pub mod error;
pub mod plugin_manager;

pub use config::{Config, ConfigState};
pub use error::ManagerError;
pub use plugin_manager::PluginManager;
