//! reqwest-backed transport.

use async_trait::async_trait;
use tracing::{debug, instrument, warn};
use url::Url;

use feed_core::error::{FeedError, Result};
use feed_core::{Method, RequestSpec, Transport};

use crate::config::ClientConfig;

/// Sends requests to the feed server over HTTP.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    base_url: Url,
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport for the configured server.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| FeedError::ConfigError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url()?,
            http_client,
        })
    }

    /// Server origin requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path()))]
    async fn send(&self, request: RequestSpec) -> Result<Vec<u8>> {
        let url = request.url(&self.base_url)?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.http_client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(serde_json::to_vec(body)?);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                FeedError::Timeout(e.to_string())
            } else {
                FeedError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Request rejected");
            return Err(FeedError::bad_status(status.as_u16(), text));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FeedError::HttpError(e.to_string()))?;
        debug!(bytes = body.len(), "Response received");
        Ok(body.to_vec())
    }
}
