use super::env_helpers::{load_env_path_opt, load_env_string_opt, load_env_var};
use super::groups::PipelineEntry;
use super::{ConfigError, LogFormat, LogLevel};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format (compact or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Configuration file path (optional, may declare pipelines)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Container listing interval in milliseconds
    #[arg(long, env = "WATCH_INTERVAL_MS", default_value = "1000")]
    pub watch_interval_ms: u64,

    /// Run without a container runtime
    #[arg(long, env = "DISABLE_CONTAINER_WATCHER")]
    pub disable_container_watcher: bool,

    /// Docker socket path (platform default when unset)
    #[arg(long, env = "DOCKER_SOCKET")]
    pub docker_socket: Option<String>,

    /// Upper bound on graceful shutdown in milliseconds
    #[arg(long, env = "SHUTDOWN_TIMEOUT_MS", default_value = "10000")]
    pub shutdown_timeout_ms: u64,

    /// Pipelines declared in the configuration file
    #[arg(skip)]
    pub pipelines: Vec<PipelineEntry>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub watch_interval: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub shutdown_timeout: Duration,

    /// Directory relative `spec_file` paths resolve against
    #[serde(skip)]
    #[arg(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            config_file: None,
            watch_interval_ms: 1000,
            disable_container_watcher: false,
            docker_socket: None,
            shutdown_timeout_ms: 10_000,
            pipelines: Vec::new(),
            watch_interval: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_millis(10_000),
            base_dir: None,
        }
    }
}

impl Config {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        load_env_var("LOG_LEVEL", &mut config.log_level)?;
        load_env_var("LOG_FORMAT", &mut config.log_format)?;
        load_env_path_opt("CONFIG_FILE", &mut config.config_file);
        load_env_var("WATCH_INTERVAL_MS", &mut config.watch_interval_ms)?;
        load_env_var(
            "DISABLE_CONTAINER_WATCHER",
            &mut config.disable_container_watcher,
        )?;
        load_env_string_opt("DOCKER_SOCKET", &mut config.docker_socket);
        load_env_var("SHUTDOWN_TIMEOUT_MS", &mut config.shutdown_timeout_ms)?;

        if let Some(path) = config.config_file.clone() {
            config.merge_file(Self::read_file(&path)?);
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    /// CLI flags and environment first, then the `--config-file` contents
    /// for every value the command line left at its default.
    pub fn from_args_and_env<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);

        if let Some(path) = config.config_file.clone() {
            config.merge_file(Self::read_file(&path)?);
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path.as_ref())?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.config_file = Some(path.to_path_buf());
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    fn merge_file(&mut self, file: Config) {
        let defaults = Config::default();

        if self.log_level == defaults.log_level {
            self.log_level = file.log_level;
        }
        if self.log_format == defaults.log_format {
            self.log_format = file.log_format;
        }
        if self.watch_interval_ms == defaults.watch_interval_ms {
            self.watch_interval_ms = file.watch_interval_ms;
        }
        if !self.disable_container_watcher {
            self.disable_container_watcher = file.disable_container_watcher;
        }
        if self.docker_socket.is_none() {
            self.docker_socket = file.docker_socket;
        }
        if self.shutdown_timeout_ms == defaults.shutdown_timeout_ms {
            self.shutdown_timeout_ms = file.shutdown_timeout_ms;
        }
        self.pipelines = file.pipelines;
        self.base_dir = file.base_dir;
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.watch_interval = Duration::from_millis(self.watch_interval_ms);
        self.shutdown_timeout = Duration::from_millis(self.shutdown_timeout_ms);
        Ok(())
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }
}
