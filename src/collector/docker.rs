use super::runtime::{
    ContainerRecord, ContainerRuntime, ContainerSummary, LogLine, LogStream, RuntimeError,
    parse_env_list,
};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::query_parameters::{InspectContainerOptions, ListContainersOptions, LogsOptions};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

const LOG_FORWARD_CAPACITY: usize = 256;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_socket_defaults()?;
        Ok(Self { docker })
    }

    pub fn connect_with_socket(socket_path: &str) -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)?;
        Ok(Self { docker })
    }

    pub fn connect_with_http(address: &str) -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_http(address, 120, bollard::API_DEFAULT_VERSION)?;
        Ok(Self { docker })
    }

    /// `unix://` or bare paths go to the socket connector, anything else
    /// with a scheme is treated as a TCP daemon address.
    pub fn connect_with_address(address: &str) -> Result<Self, RuntimeError> {
        match address.strip_prefix("unix://") {
            Some(path) => Self::connect_with_socket(path),
            None if address.contains("://") => Self::connect_with_http(address),
            None => Self::connect_with_socket(address),
        }
    }

    pub async fn can_connect(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    fn to_summary(container: bollard::models::ContainerSummary) -> Option<ContainerSummary> {
        let id = container.id?;
        let name = container
            .names
            .as_ref()
            .and_then(|names| names.first())
            .map(|name| name.trim_start_matches('/').to_string())
            .unwrap_or_else(|| id.clone());
        Some(ContainerSummary {
            id,
            name,
            labels: container.labels.unwrap_or_default(),
        })
    }

    fn to_log_line(output: LogOutput) -> Option<LogLine> {
        let (stream, message) = match output {
            LogOutput::StdOut { message } | LogOutput::Console { message } => {
                (LogStream::Stdout, message)
            }
            LogOutput::StdErr { message } => (LogStream::Stderr, message),
            LogOutput::StdIn { .. } => return None,
        };
        let content = String::from_utf8_lossy(&message)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        Some(LogLine {
            stream,
            content,
            time: chrono::Utc::now(),
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let options = ListContainersOptions {
            all: false, // Only running containers
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .filter_map(Self::to_summary)
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerRecord>, RuntimeError> {
        let details = match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(details) => details,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let config = details.config.unwrap_or_default();
        let name = details
            .name
            .map(|name| name.trim_start_matches('/').to_string())
            .unwrap_or_else(|| id.to_string());

        Ok(Some(ContainerRecord {
            id: details.id.unwrap_or_else(|| id.to_string()),
            name,
            env: parse_env_list(config.env.unwrap_or_default()),
            labels: config.labels.unwrap_or_default(),
        }))
    }

    fn stream_logs(
        &self,
        id: &str,
        stdout: bool,
        stderr: bool,
    ) -> BoxStream<'static, Result<LogLine, RuntimeError>> {
        let options = LogsOptions {
            follow: true,
            stdout,
            stderr,
            timestamps: false,
            tail: "0".to_string(),
            ..Default::default()
        };

        let docker = self.docker.clone();
        let container_id = id.to_string();
        let (tx, rx) = mpsc::channel(LOG_FORWARD_CAPACITY);

        // The forwarder exits as soon as the consumer drops its end, even if
        // the container is silent.
        tokio::spawn(async move {
            let mut logs = docker.logs(&container_id, Some(options));
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    next = logs.next() => {
                        let item = match next {
                            Some(Ok(output)) => match Self::to_log_line(output) {
                                Some(line) => Ok(line),
                                None => continue,
                            },
                            Some(Err(e)) => Err(RuntimeError::from(e)),
                            None => break,
                        };
                        let failed = item.is_err();
                        if tx.send(item).await.is_err() || failed {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(container_id = %container_id, "Docker log forwarder stopped");
        });

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed()
    }
}

impl std::fmt::Debug for DockerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerRuntime")
            .field("docker", &"Docker { ... }")
            .finish()
    }
}
