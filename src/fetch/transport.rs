//! The pluggable transport seam and its reqwest implementation.
//!
//! Every chain stage implements [`Transport`] and wraps another one, so the
//! innermost [`HttpTransport`] can be swapped for a test double without
//! touching the stages.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::StreamExt;
use reqwest::Client;
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use super::cookies::SessionCookies;
use super::{FetchError, FetchRequest, FetchResponse};
use crate::user_agent;

/// Executes one request and returns a fully buffered response.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends `request`. Non-2xx statuses are responses, not errors.
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Settings for the reqwest client.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub request_timeout: Duration,
    /// User-Agent sent when a request does not set its own.
    pub user_agent: String,
    /// Cookie store shared with the challenge stage.
    pub cookies: Option<Arc<SessionCookies>>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            user_agent: user_agent::default_user_agent(),
            cookies: None,
        }
    }
}

/// reqwest-backed transport. Create once and share; the client pools connections.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error (e.g. TLS backend initialization).
    pub fn new(config: &TransportConfig) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .gzip(true)
            .user_agent(config.user_agent.clone());
        if let Some(cookies) = &config.cookies {
            builder = builder.cookie_provider(Arc::clone(cookies));
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(method = %request.method(), url = %request.url()))]
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        request.ensure_active()?;
        let url = request.url().as_str().to_string();

        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::transport(&url, &e))?;

        let status = response.status();
        let final_url = response.url().clone();
        let headers = response.headers().clone();

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::transport(&url, &e))?;
            body.extend_from_slice(&chunk);
        }

        debug!(status = status.as_u16(), bytes = body.len(), "response received");
        Ok(FetchResponse::new(status, final_url, headers, body.freeze()))
    }
}
