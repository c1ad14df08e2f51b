use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("Container not found: {0}")]
    ContainerNotFound(String),
    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),
}

/// Cheap per-tick view returned by a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

/// Full metadata for a tracked container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
}

impl ContainerRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            env: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Splits Docker's `KEY=VALUE` env entries. Entries without `=` map to an
/// empty value.
pub fn parse_env_list<I, S>(entries: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    entries
        .into_iter()
        .filter_map(|entry| {
            let entry = entry.as_ref();
            if entry.is_empty() {
                return None;
            }
            match entry.split_once('=') {
                Some((key, value)) => Some((key.to_string(), value.to_string())),
                None => Some((entry.to_string(), String::new())),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct LogLine {
    pub stream: LogStream,
    pub content: String,
    pub time: DateTime<Utc>,
}

/// Seam over the container engine so the watcher and inputs can run against
/// Docker in production and an in-memory fake in tests.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// `Ok(None)` when the container disappeared between listing and inspection.
    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerRecord>, RuntimeError>;

    /// Follows new output of a container from now on.
    fn stream_logs(
        &self,
        id: &str,
        stdout: bool,
        stderr: bool,
    ) -> BoxStream<'static, Result<LogLine, RuntimeError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_list() {
        let env = parse_env_list(["test=111", "PATH=/usr/bin:/bin", "EMPTY=", "FLAG", ""]);
        assert_eq!(env.get("test").map(String::as_str), Some("111"));
        assert_eq!(env.get("PATH").map(String::as_str), Some("/usr/bin:/bin"));
        assert_eq!(env.get("EMPTY").map(String::as_str), Some(""));
        assert_eq!(env.get("FLAG").map(String::as_str), Some(""));
        assert_eq!(env.len(), 4);
    }
}
