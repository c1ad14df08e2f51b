use super::config::{LogFormat, LogLevel};
use thiserror::Error;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },
    #[error("Logging initialization failed: {0}")]
    Init(String),
}

/// Builds the agent's `EnvFilter` from a default level plus per-target
/// directives and installs the global subscriber.
#[derive(Debug, Clone)]
pub struct LoggingSystem {
    default_level: LogLevel,
    format: LogFormat,
    directives: Vec<Directive>,
}

impl LoggingSystem {
    pub fn new(default_level: LogLevel, format: LogFormat) -> Self {
        Self {
            default_level,
            format,
            directives: Vec::new(),
        }
    }

    /// Quiets the chatty transport crates.
    pub fn with_default_directives(mut self) -> Self {
        for target in ["hyper", "hyper_util", "reqwest", "h2", "bollard"] {
            if let Ok(directive) = format!("{target}=warn").parse() {
                self.directives.push(directive);
            }
        }
        self
    }

    pub fn add_directive(&mut self, directive: &str) -> Result<(), LoggingError> {
        let parsed = directive
            .parse::<Directive>()
            .map_err(|e| LoggingError::InvalidDirective {
                directive: directive.to_string(),
                reason: e.to_string(),
            })?;
        self.directives.push(parsed);
        Ok(())
    }

    pub fn directive_count(&self) -> usize {
        self.directives.len()
    }

    pub fn build_filter_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.directives.len() + 1);
        parts.push(self.default_level.as_str().to_string());
        parts.extend(self.directives.iter().map(ToString::to_string));
        parts.join(",")
    }

    /// `RUST_LOG`, when set, replaces the configured filter entirely.
    pub fn build_filter(&self) -> Result<EnvFilter, LoggingError> {
        if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            return EnvFilter::try_from_default_env()
                .map_err(|e| LoggingError::Init(format!("invalid RUST_LOG: {e}")));
        }
        let filter = self.build_filter_string();
        EnvFilter::try_new(&filter)
            .map_err(|e| LoggingError::Init(format!("invalid filter '{filter}': {e}")))
    }

    pub fn init(&self) -> Result<(), LoggingError> {
        let filter = self.build_filter()?;
        let registry = tracing_subscriber::registry().with(filter);

        let result = match self.format {
            LogFormat::Compact => registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true)
                        .compact(),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_target(true),
                )
                .try_init(),
        };
        result.map_err(|e| LoggingError::Init(e.to_string()))
    }
}
