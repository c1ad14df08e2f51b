pub mod config;
pub mod logging_system;
pub mod shutdown;

pub use config::{Config, ConfigError, LogFormat, LogLevel, PipelineEntry};
pub use logging_system::{LoggingError, LoggingSystem};
pub use shutdown::{ShutdownReason, wait_for_signal};

use crate::collector::{ContainerRegistry, ContainerRuntime, ContainerWatcher, DockerRuntime};
use crate::domain::AgentError;
use crate::manager::PluginManager;
use crate::plugin::PluginRegistry;
use crate::reliability::AlarmReporter;
use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct App {
    config: Config,
    manager: Arc<PluginManager>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
}

impl App {
    pub async fn from_args<I, T>(args: I) -> Result<Self, AgentError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args_and_env(args)?;
        Self::from_config(config).await
    }

    /// Connects the container runtime (unless disabled) and builds the
    /// plugin manager with the built-in plugin catalogue.
    pub async fn from_config(config: Config) -> Result<Self, AgentError> {
        let runtime = if config.disable_container_watcher {
            info!("Container watcher disabled, running without a container runtime");
            None
        } else {
            Some(Self::connect_runtime(&config).await?)
        };
        Ok(Self::with_parts(config, PluginRegistry::with_builtins(), runtime))
    }

    /// Assembles an agent from already constructed parts.
    pub fn with_parts(
        config: Config,
        registry: PluginRegistry,
        runtime: Option<Arc<dyn ContainerRuntime>>,
    ) -> Self {
        let manager = Arc::new(PluginManager::new(
            registry,
            Arc::new(ContainerRegistry::new()),
            runtime.clone(),
            AlarmReporter::new(),
        ));
        Self {
            config,
            manager,
            runtime,
        }
    }

    async fn connect_runtime(config: &Config) -> Result<Arc<dyn ContainerRuntime>, AgentError> {
        let docker = match &config.docker_socket {
            Some(address) => DockerRuntime::connect_with_address(address)?,
            None => DockerRuntime::connect()?,
        };
        if !docker.can_connect().await {
            warn!("Docker daemon is not reachable yet, container listing will keep retrying");
        }
        Ok(Arc::new(docker))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    /// Loads every configured pipeline. A broken pipeline is logged and
    /// skipped; the rest still load.
    pub fn load_pipelines(&self) -> usize {
        let mut loaded = 0;
        for entry in &self.config.pipelines {
            let result = entry
                .load_spec(self.config.base_dir())
                .map_err(AgentError::from)
                .and_then(|json| {
                    self.manager
                        .load_config(&entry.project, &entry.logstore, &entry.name, entry.key, &json)
                        .map_err(AgentError::from)
                });
            match result {
                Ok(()) => loaded += 1,
                Err(e) => error!(pipeline = %entry.name, error = %e, "Failed to load pipeline"),
            }
        }
        self.manager.refresh_env_and_label();
        loaded
    }

    /// Starts every loaded pipeline and returns how many are running.
    pub async fn start_pipelines(&self) -> usize {
        for name in self.manager.config_names() {
            if let Err(e) = self.manager.start_config(&name).await {
                error!(pipeline = %name, error = %e, "Failed to start pipeline");
            }
        }
        self.manager.running_count()
    }

    pub async fn run(self) -> Result<(), AgentError> {
        let loaded = self.load_pipelines();
        let running = self.start_pipelines().await;
        info!(
            configured = self.config.pipelines.len(),
            loaded, running, "Pipelines started"
        );

        let cancel = CancellationToken::new();
        let watcher = self.runtime.as_ref().map(|runtime| {
            let watcher = ContainerWatcher::new(
                Arc::clone(&self.manager),
                Arc::clone(runtime),
                self.config.watch_interval,
            );
            tokio::spawn(watcher.run(cancel.child_token()))
        });

        info!("rask-log-agent is running. Press Ctrl+C to stop.");
        let signal = wait_for_signal().await;

        cancel.cancel();
        if let Some(handle) = watcher
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Container watcher task ended abnormally");
        }

        let drained = self.manager.stop_all(self.config.shutdown_timeout).await;
        signal.map_err(|e| AgentError::Shutdown(format!("signal handler failed: {e}")))?;
        if !drained {
            return Err(AgentError::Shutdown(format!(
                "pipelines did not stop within {}ms",
                self.config.shutdown_timeout_ms
            )));
        }

        info!("rask-log-agent stopped.");
        Ok(())
    }
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

// Main entry point for the application
pub async fn main() -> anyhow::Result<()> {
    let config =
        Config::from_args_and_env(std::env::args_os()).context("failed to load configuration")?;

    LoggingSystem::new(config.log_level, config.log_format)
        .with_default_directives()
        .init()
        .context("failed to initialize logging")?;

    info!("Starting rask-log-agent v{}", get_version());

    let app = App::from_config(config)
        .await
        .context("failed to initialize agent")?;
    app.run().await.context("agent terminated with an error")
}
