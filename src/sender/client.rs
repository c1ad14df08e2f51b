use super::error::DeliveryError;
use super::task::Payload;
use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder, StatusCode};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

/// Delivery seam used by the engine's workers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &Payload) -> Result<(), DeliveryError>;

    fn endpoint(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub max_connections: usize,
    pub keep_alive_timeout: Duration,
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout: Duration::from_secs(5),
            connection_timeout: Duration::from_secs(5),
            max_connections: 20,
            keep_alive_timeout: Duration::from_secs(60),
            user_agent: format!("rask-log-agent/{}", env!("CARGO_PKG_VERSION")),
            headers: BTreeMap::new(),
        }
    }
}

/// Plain HTTP POST transport. Success is any 2xx response.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    url: Url,
    headers: HeaderMap,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let url: Url = config
            .endpoint
            .parse()
            .map_err(|e| ClientError::InvalidConfiguration(format!("Invalid endpoint URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidConfiguration(format!(
                "Unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| ClientError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| ClientError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            headers.insert(header_name, header_value);
        }

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(config.keep_alive_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ClientError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint,
            url,
            headers,
        })
    }
}

/// Maps a non-2xx status onto the retry taxonomy.
pub fn classify_status(status: StatusCode) -> Option<DeliveryError> {
    if status.is_success() {
        return None;
    }
    let message = format!("HTTP {status}");
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Some(DeliveryError::Recoverable(message))
    } else {
        Some(DeliveryError::NonRecoverable(message))
    }
}

fn classify_transport_error(error: reqwest::Error) -> DeliveryError {
    if error.is_builder() {
        DeliveryError::NonRecoverable(error.to_string())
    } else {
        DeliveryError::Recoverable(error.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &Payload) -> Result<(), DeliveryError> {
        let start = Instant::now();

        let mut request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, payload.content_type)
            .header("x-batch-id", payload.batch_id.as_str())
            .header("x-batch-size", payload.record_count.to_string());
        if let Some(encoding) = payload.content_encoding {
            request = request.header(CONTENT_ENCODING, encoding);
        }

        let response = request
            .body(payload.body.clone())
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        match classify_status(status) {
            None => {
                debug!(
                    batch_id = %payload.batch_id,
                    bytes = payload.len(),
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Delivered payload"
                );
                Ok(())
            }
            Some(error) => {
                warn!(
                    batch_id = %payload.batch_id,
                    status = status.as_u16(),
                    "Endpoint rejected payload"
                );
                Err(error)
            }
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(StatusCode::OK), None);
        assert_eq!(classify_status(StatusCode::NO_CONTENT), None);
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE)
            .unwrap()
            .is_recoverable());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS)
            .unwrap()
            .is_recoverable());
        assert!(!classify_status(StatusCode::BAD_REQUEST)
            .unwrap()
            .is_recoverable());
    }

    #[test]
    fn test_rejects_invalid_endpoint() {
        let config = ClientConfig {
            endpoint: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            HttpTransport::new(config),
            Err(ClientError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_header() {
        let config = ClientConfig {
            endpoint: "http://localhost:9600/v1/logs".to_string(),
            headers: BTreeMap::from([("bad header".to_string(), "v".to_string())]),
            ..Default::default()
        };
        assert!(matches!(
            HttpTransport::new(config),
            Err(ClientError::InvalidHeader { .. })
        ));
    }
}
