//! HTTP transport for CDN and origin store communication

use crate::{AcceptHint, EngineConfig, EngineError, FetchError, FetchedPayload, Transport};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Enable compression
    pub compression: bool,
    /// User agent
    pub user_agent: String,
    /// Extra headers sent with every request
    pub headers: Vec<(String, String)>,
}

impl From<&EngineConfig> for ClientConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            timeout: config.attempt_timeout,
            connect_timeout: config.connect_timeout,
            compression: config.compression,
            user_agent: config.user_agent.clone(),
            headers: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Add header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// `reqwest`-backed transport
pub struct HttpTransport {
    client: Client,
    config: ClientConfig,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(config: ClientConfig) -> Result<Self, EngineError> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent);

        if config.compression {
            builder = builder.gzip(true).brotli(true);
        }

        let client = builder
            .build()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Handle HTTP response
    async fn handle_response(&self, response: Response) -> Result<FetchedPayload, FetchError> {
        let status = response.status();

        match status {
            StatusCode::OK => {
                let compressed = still_encoded(response.headers());
                let data = response.bytes().await?;
                Ok(FetchedPayload { data, compressed })
            }

            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(FetchError::NotFound(response.url().to_string()))
            }

            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1)
                    * 1000;

                Err(FetchError::RateLimited {
                    retry_after_ms: retry_after,
                })
            }

            _ => Err(FetchError::Http {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

/// Whether the body is still in a compressed content encoding
///
/// With compression enabled reqwest decodes gzip and brotli bodies and drops
/// `Content-Encoding`, so those payloads arrive decoded and report `false`.
/// A header that survives names an encoding the client left untouched.
fn still_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |encoding| {
            encoding
                .split(',')
                .map(str::trim)
                .any(|e| !e.is_empty() && !e.eq_ignore_ascii_case("identity"))
        })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str, accept: AcceptHint) -> Result<FetchedPayload, FetchError> {
        let url = reqwest::Url::parse(url)?;
        debug!("Fetching: {}", url);

        let mut request = self.client.get(url).header(header::ACCEPT, accept.mime());
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }
}
