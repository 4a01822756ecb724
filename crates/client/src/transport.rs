//! HTTP transport behind the rate limiter.
//!
//! Everything above this module sees HTTP as one call: a GET with headers,
//! query parameters and a timeout that yields a status, headers and a body.
//! [`Transport`] is that seam; [`ReqwestTransport`] is the production
//! implementation and tests substitute scripted ones.

use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;

/// Default user agent.
const DEFAULT_USER_AGENT: &str = "rentscout/0.1";

/// One outbound GET.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub timeout: Duration,
}

/// A completed HTTP exchange, whatever its status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, headers: HashMap::new(), body: body.into() }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Server-advised wait from a numeric `Retry-After` header.
    pub fn retry_after(&self) -> Option<Duration> {
        let secs: f64 = self.header("retry-after")?.trim().parse().ok()?;
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(secs).ok()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Connection-level failure; always retryable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Request timeout.
    #[error("request timeout")]
    Timeout,

    /// Connection, TLS or body read failure.
    #[error("network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() { TransportError::Timeout } else { TransportError::Network(err.to_string()) }
    }
}

/// Performs one HTTP GET.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by a shared reqwest client with rustls.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    /// Build the client; per-request timeouts come from [`HttpRequest::timeout`].
    pub fn new() -> Result<Self, TransportError> {
        let http = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .http
            .get(&request.url)
            .query(&request.params)
            .timeout(request.timeout)
            .header("Accept", "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.as_str().to_ascii_lowercase(), value.to_str().ok()?.to_string())))
            .collect();
        let body = response.bytes().await?;

        tracing::debug!(url = %request.url, status, bytes = body.len(), "http get");
        Ok(HttpResponse { status, headers, body })
    }
}
