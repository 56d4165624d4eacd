//! reqwest-backed [`Transport`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};

use super::{RequestOptions, Transport, TransportError, TransportResponse};

/// Configuration for the reqwest transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// User agent string (default: "stashfetch/0.1")
    pub user_agent: String,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { user_agent: "stashfetch/0.1".to_string(), timeout: Duration::from_millis(20000), max_redirects: 5 }
    }
}

/// HTTP transport over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: Client,
    config: TransportConfig,
}

impl ReqwestTransport {
    /// Create a new transport with the given configuration.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, options: &RequestOptions) -> Result<TransportResponse, TransportError> {
        let target = parse_target(url)?;

        let mut request = self.http.get(target);
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| classify(url, e))?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
            .collect();
        let encoding = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_from_content_type);

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() { TransportError::Timeout(url.to_string()) } else { TransportError::Body(e.to_string()) }
        })?;

        tracing::debug!(url, status, bytes = body.len(), "fetched");

        Ok(TransportResponse { status, headers, body, encoding })
    }
}

fn parse_target(url: &str) -> Result<url::Url, TransportError> {
    let parsed = url::Url::parse(url.trim()).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(TransportError::InvalidUrl(format!("unsupported scheme: {scheme}"))),
    }
}

fn classify(url: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() { TransportError::Timeout(url.to_string()) } else { TransportError::Network(err.to_string()) }
}

/// Extract the `charset` parameter from a Content-Type value.
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_ascii_lowercase())
    })
}
