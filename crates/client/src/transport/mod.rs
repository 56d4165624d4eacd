//! The network collaborator behind the caching client.
//!
//! A [`Transport`] performs one HTTP GET and hands back status, headers, raw
//! body and a text encoding. Timeouts and retries are the transport's
//! business; the caching client never retries.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

pub use http::{ReqwestTransport, TransportConfig};

/// Per-request options passed through to the transport.
///
/// Options do not take part in the cache key; two requests for the same URL
/// with different options share one cache entry.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Query parameters appended to the URL.
    pub query: Vec<(String, String)>,
    /// Overrides the transport's default timeout.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What a transport returns for a completed request, whatever its status.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Declared or detected text encoding label, if any.
    pub encoding: Option<String>,
}

/// Transport failures. These are never cached.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a GET for `url`.
    async fn get(&self, url: &str, options: &RequestOptions) -> Result<TransportResponse, TransportError>;
}
