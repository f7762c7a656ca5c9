// src/repository/client.rs

//! HTTP client for repository operations
//!
//! All network access (index, chart archives, icons) goes through the
//! [`HttpClient`] trait so that the sync pipeline can be driven by an
//! in-process fake in tests. [`ReqwestClient`] is the production
//! implementation with a descriptive User-Agent and optional custom CA trust.

use crate::config::{HttpSection, parse_duration};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;
use tracing::debug;

/// Product token used in the User-Agent header
pub const USER_AGENT_PRODUCT: &str = "chartsync";

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const PEM_CERT_MARKER: &str = "-----BEGIN CERTIFICATE-----";

/// A fully buffered HTTP response
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Minimal GET-only HTTP transport
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Issue a GET request, optionally with an `Authorization` header value
    ///
    /// Returns the response regardless of status; only transport failures
    /// (DNS, connect, TLS, body read) are errors.
    async fn get(&self, url: &str, auth_header: Option<&str>) -> Result<HttpResponse>;
}

/// Issue a GET and fail with a transport error on a non-2xx status
pub async fn get_checked(
    client: &dyn HttpClient,
    url: &str,
    auth_header: Option<&str>,
) -> Result<HttpResponse> {
    let response = client.get(url, auth_header).await?;
    if !response.is_success() {
        return Err(Error::TransportError(format!(
            "HTTP {} from {}",
            response.status, url
        )));
    }
    Ok(response)
}

/// Build the User-Agent header value
///
/// `chartsync/<version>`, or `chartsync/<version> (<comment>)` when a
/// comment such as the embedding application's name is configured.
pub fn user_agent(version: &str, comment: Option<&str>) -> String {
    match comment.map(str::trim).filter(|c| !c.is_empty()) {
        Some(comment) => format!("{}/{} ({})", USER_AGENT_PRODUCT, version, comment),
        None => format!("{}/{}", USER_AGENT_PRODUCT, version),
    }
}

/// reqwest-backed HTTP client
///
/// Bodies larger than the configured `max_body_size` fail with a transport
/// error before they are fully buffered.
pub struct ReqwestClient {
    client: reqwest::Client,
    max_body_size: u64,
}

impl ReqwestClient {
    /// Create a client with default settings and system trust roots
    pub fn new() -> Result<Self> {
        Self::from_config(&HttpSection::default())
    }

    /// Create a client from the `[http]` configuration section
    ///
    /// A configured CA bundle is added on top of the system trust roots.
    pub fn from_config(config: &HttpSection) -> Result<Self> {
        let timeout = parse_duration(&config.timeout).unwrap_or(HTTP_TIMEOUT);
        let agent = user_agent(
            env!("CARGO_PKG_VERSION"),
            config.user_agent_comment.as_deref(),
        );

        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(agent);

        if let Some(ca_file) = &config.ca_file {
            let pem = std::fs::read(ca_file).map_err(|e| {
                Error::IoError(format!("Failed to read CA bundle {}: {e}", ca_file.display()))
            })?;
            if !String::from_utf8_lossy(&pem).contains(PEM_CERT_MARKER) {
                return Err(Error::InitError(format!(
                    "CA bundle {} contains no PEM certificates",
                    ca_file.display()
                )));
            }
            // rustls splits the bundle into individual roots when it is added
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                Error::InitError(format!("Invalid CA bundle {}: {e}", ca_file.display()))
            })?;
            debug!("Trusting custom CA bundle {}", ca_file.display());
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_body_size: config.max_body_size,
        })
    }
}

impl ReqwestClient {
    fn oversized(&self, url: &str) -> Error {
        Error::TransportError(format!(
            "Response from {} exceeds {} bytes",
            url, self.max_body_size
        ))
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str, auth_header: Option<&str>) -> Result<HttpResponse> {
        let mut request = self.client.get(url);
        if let Some(auth) = auth_header {
            request = request.header(AUTHORIZATION, auth);
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| Error::TransportError(format!("Failed to fetch {}: {e}", url)))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(length) = response.content_length()
            && length > self.max_body_size
        {
            return Err(self.oversized(url));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            Error::TransportError(format!("Failed to read response from {}: {e}", url))
        })? {
            if body.len() as u64 + chunk.len() as u64 > self.max_body_size {
                return Err(self.oversized(url));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}
