//! Ad Server Boundary
//!
//! The [`AdServer`] trait is everything the manager knows about the ad
//! server: hand it a placement with the sizes and types its slots accept,
//! get back at most one creative.
//!
//! # HTTP Protocol
//!
//! [`HttpAdServer`] issues
//! `GET {endpoint}?placement=poster_front&sizes=300x250,728x90&types=logo`.
//! A `204`, an empty body or JSON `null` means "no creative"; otherwise the
//! body is a JSON [`Creative`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use super::types::{AdPlacement, AdSize, AdType, Creative};
use crate::config::AdsConfig;

/// One request per placement per batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AdRequest {
    /// Placement being filled
    pub placement: AdPlacement,
    /// Union of the registered positions' sizes, in first-seen order
    pub sizes: Vec<AdSize>,
    /// Union of the registered positions' ad types
    pub ad_types: Vec<AdType>,
}

impl AdRequest {
    /// Query string parameters for the HTTP boundary
    #[must_use]
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("placement", self.placement.to_string())];
        if !self.sizes.is_empty() {
            let sizes: Vec<String> = self.sizes.iter().map(ToString::to_string).collect();
            params.push(("sizes", sizes.join(",")));
        }
        if !self.ad_types.is_empty() {
            let types: Vec<&str> = self.ad_types.iter().map(AdType::as_str).collect();
            params.push(("types", types.join(",")));
        }
        params
    }
}

/// Errors from the ad server
#[derive(Debug, Error)]
pub enum AdServerError {
    /// Transport-level failure (connect, timeout, TLS)
    #[error("Ad server request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("Ad server returned HTTP {0}")]
    Status(u16),

    /// Body was not a valid creative
    #[error("Could not decode ad server response: {0}")]
    Decode(String),

    /// No ad server endpoint is configured
    #[error("No ad server endpoint configured")]
    NotConfigured,
}

/// Source of creatives
#[async_trait]
pub trait AdServer: Send + Sync {
    /// Fetch a creative for the request; `Ok(None)` when the server has none
    async fn request(&self, request: &AdRequest) -> Result<Option<Creative>, AdServerError>;

    /// Name used in logs
    fn name(&self) -> &str {
        "ad-server"
    }
}

/// Ad server reached over HTTP
#[derive(Clone, Debug)]
pub struct HttpAdServer {
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpAdServer {
    /// Create a client for `endpoint`
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, AdServerError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            http_client,
        })
    }

    /// Create from the `[ads]` configuration section
    pub fn from_config(config: &AdsConfig) -> Result<Self, AdServerError> {
        let endpoint = config
            .server_url
            .clone()
            .ok_or(AdServerError::NotConfigured)?;
        Self::new(endpoint, config.request_timeout)
    }

    /// Configured endpoint
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Ad server that never has a creative
///
/// Stands in when no endpoint is configured: slots still register and
/// coalesce, every request comes back empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAdServer;

#[async_trait]
impl AdServer for NoAdServer {
    async fn request(&self, _request: &AdRequest) -> Result<Option<Creative>, AdServerError> {
        Ok(None)
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Build the ad server for the `[ads]` section
///
/// Without a usable endpoint the page runs without ads rather than failing.
#[must_use]
pub fn ad_server_from_config(config: &AdsConfig) -> Arc<dyn AdServer> {
    match HttpAdServer::from_config(config) {
        Ok(server) => Arc::new(server),
        Err(AdServerError::NotConfigured) => {
            tracing::warn!("No ad server endpoint configured, ads are disabled");
            Arc::new(NoAdServer)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not create ad server client, ads are disabled");
            Arc::new(NoAdServer)
        }
    }
}

/// Decode a response body into an optional creative
pub(crate) fn decode_creative(body: &str) -> Result<Option<Creative>, AdServerError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<Option<Creative>>(trimmed)
        .map_err(|e| AdServerError::Decode(e.to_string()))
}

#[async_trait]
impl AdServer for HttpAdServer {
    async fn request(&self, request: &AdRequest) -> Result<Option<Creative>, AdServerError> {
        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&request.query_params())
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AdServerError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        decode_creative(&body)
    }

    fn name(&self) -> &str {
        &self.endpoint
    }
}
