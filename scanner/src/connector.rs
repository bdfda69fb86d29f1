use crate::types::ErrorMessages;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::form_urlencoded;
use url::Url;

#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Transport-level failure: refused connection, DNS, timeout.
    #[error("Server {url} can not be reached: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Server {url} returned HTTP {status}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl ConnectorError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ConnectorError::Unreachable { .. })
    }
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Transport to the analysis server. Paths are relative to the host URL and
/// start with `/`.
#[async_trait]
pub trait ServerConnector: Send + Sync {
    async fn get(&self, path: &str) -> ConnectorResult<Vec<u8>>;

    async fn post_json(&self, path: &str, body: &serde_json::Value) -> ConnectorResult<Vec<u8>>;

    fn base_url(&self) -> &str;
}

/// Builds a server path with form-encoded query parameters, in order.
pub fn request_path(path: &str, query: &[(&str, &str)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query)
        .finish();
    format!("{}?{}", path, query)
}

pub struct HttpConnector {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConnector {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ConnectorResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url).map_err(|e| ConnectorError::InvalidConfig {
            message: format!("Invalid host URL {}: {}", base_url, e),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || !parsed.has_host() {
            return Err(ConnectorError::InvalidConfig {
                message: format!("Host URL must start with http:// or https://: {}", base_url),
            });
        }

        // No idle pooling, a restarted server must see fresh connections.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| ConnectorError::InvalidConfig {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_send_error(&self, err: reqwest::Error) -> ConnectorError {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            ConnectorError::Unreachable {
                url: self.base_url.clone(),
                reason: err.to_string(),
            }
        } else {
            ConnectorError::Network(err)
        }
    }

    async fn read_response(&self, url: &str, response: reqwest::Response) -> ConnectorResult<Vec<u8>> {
        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.map_send_error(e))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorMessages>(&body)
                .ok()
                .and_then(|errors| errors.errors.into_iter().next().map(|e| e.msg))
                .unwrap_or_else(|| String::from_utf8_lossy(&body).trim().to_string());
            return Err(ConnectorError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        Ok(body.to_vec())
    }
}

#[async_trait]
impl ServerConnector for HttpConnector {
    async fn get(&self, path: &str) -> ConnectorResult<Vec<u8>> {
        let url = self.url(path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        self.read_response(&url, response).await
    }

    async fn post_json(&self, path: &str, body: &serde_json::Value) -> ConnectorResult<Vec<u8>> {
        let url = self.url(path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        self.read_response(&url, response).await
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}
