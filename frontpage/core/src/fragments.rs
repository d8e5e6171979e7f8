//! Recurring Fragment Fetch
//!
//! Some page regions (live scores, most-read lists) are server-rendered
//! fragments refreshed on a timer. [`recurring_fetch_html`] polls one endpoint
//! for the lifetime of a [`ViewScope`]:
//!
//! 1. fetch immediately, then once per interval
//! 2. on success, hand the [`Fragment`] to the success callback and publish
//!    [`PageEvent::FragmentLoaded`]
//! 3. on failure, hand the error and the placeholder message to the failure
//!    callback, publish [`PageEvent::FragmentFailed`] and keep polling
//!
//! Tearing the scope down cancels the loop, including a fetch in flight.
//!
//! Endpoints answer with HTML, JSON or JSONP (`callback({...});`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::MissedTickBehavior;

use crate::config::FragmentsConfig;
use crate::events::PageEvent;
use crate::view::ViewScope;

/// Body format an endpoint answers with
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FragmentFormat {
    /// Raw markup
    #[default]
    Html,
    /// JSON document
    Json,
    /// JSON wrapped in a callback invocation
    Jsonp,
}

/// A fetched fragment
#[derive(Clone, Debug, PartialEq)]
pub enum Fragment {
    /// Markup, inserted as-is
    Html(String),
    /// Decoded JSON (also the result of unwrapping JSONP)
    Json(serde_json::Value),
}

impl Fragment {
    /// Markup, if this is an HTML fragment
    #[must_use]
    pub fn as_html(&self) -> Option<&str> {
        match self {
            Self::Html(html) => Some(html),
            Self::Json(_) => None,
        }
    }

    /// JSON value, if this is a JSON fragment
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Html(_) => None,
        }
    }
}

/// Errors fetching a fragment
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure
    #[error("Fragment request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("Fragment endpoint returned HTTP {0}")]
    Status(u16),

    /// Body is not a callback invocation
    #[error("Malformed JSONP response: {0}")]
    Jsonp(String),

    /// Body is not valid JSON
    #[error("Invalid JSON in fragment: {0}")]
    Json(#[from] serde_json::Error),
}

/// Extract the JSON argument of a `callback(...)` body
///
/// Accepts an optional trailing semicolon and surrounding whitespace. The
/// callback name must be a plain (possibly dotted) identifier.
pub fn unwrap_jsonp(body: &str) -> Result<&str, FetchError> {
    let trimmed = body.trim().trim_end_matches(';').trim_end();

    let open = trimmed
        .find('(')
        .ok_or_else(|| FetchError::Jsonp("missing '('".to_string()))?;
    if !trimmed.ends_with(')') {
        return Err(FetchError::Jsonp("missing closing ')'".to_string()));
    }

    let callback = trimmed[..open].trim();
    let valid_callback = !callback.is_empty()
        && callback
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.');
    if !valid_callback {
        return Err(FetchError::Jsonp(format!("invalid callback name '{callback}'")));
    }

    Ok(trimmed[open + 1..trimmed.len() - 1].trim())
}

/// Turn a response body into a fragment
pub fn decode_body(body: &str, format: FragmentFormat) -> Result<Fragment, FetchError> {
    match format {
        FragmentFormat::Html => Ok(Fragment::Html(body.to_string())),
        FragmentFormat::Json => Ok(Fragment::Json(serde_json::from_str(body)?)),
        FragmentFormat::Jsonp => Ok(Fragment::Json(serde_json::from_str(unwrap_jsonp(body)?)?)),
    }
}

/// Where fragments come from
#[async_trait]
pub trait FragmentSource: Send + Sync {
    /// Fetch and decode one fragment
    async fn fetch(&self, url: &str, format: FragmentFormat) -> Result<Fragment, FetchError>;
}

/// Fragment endpoints reached over HTTP
#[derive(Clone, Debug)]
pub struct HttpFragmentSource {
    http_client: reqwest::Client,
}

impl HttpFragmentSource {
    /// Create a client with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }

    /// Create from the `[fragments]` configuration section
    pub fn from_config(config: &FragmentsConfig) -> Result<Self, FetchError> {
        Self::new(config.request_timeout)
    }
}

#[async_trait]
impl FragmentSource for HttpFragmentSource {
    async fn fetch(&self, url: &str, format: FragmentFormat) -> Result<Fragment, FetchError> {
        let response = self.http_client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        decode_body(&body, format)
    }
}

/// What to poll and how often
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    /// Endpoint URL
    pub url: String,
    /// Expected body format
    pub format: FragmentFormat,
    /// Time between fetches
    pub interval: Duration,
    /// Message handed to the failure callback
    pub placeholder_message: String,
}

impl FetchRequest {
    /// An HTML request using the configured interval and placeholder
    pub fn new(url: impl Into<String>, config: &FragmentsConfig) -> Self {
        Self {
            url: url.into(),
            format: FragmentFormat::Html,
            interval: config.poll_interval,
            placeholder_message: config.placeholder_message.clone(),
        }
    }

    /// Expect a different body format
    #[must_use]
    pub fn with_format(mut self, format: FragmentFormat) -> Self {
        self.format = format;
        self
    }

    /// Poll at a different interval
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Poll `request.url` until `scope` is torn down
///
/// Returns `false` when the loop could not start (destroyed scope, zero
/// interval or no runtime).
pub fn recurring_fetch_html<S, F>(
    scope: &ViewScope,
    source: Arc<dyn FragmentSource>,
    request: FetchRequest,
    mut on_success: S,
    mut on_failure: F,
) -> bool
where
    S: FnMut(&Fragment) + Send + 'static,
    F: FnMut(&FetchError, &str) + Send + 'static,
{
    if request.interval.is_zero() {
        tracing::warn!(url = %request.url, "Refusing to poll with a zero interval");
        return false;
    }

    let events = scope.events().clone();
    let context = scope.context();

    scope.spawn(async move {
        let mut interval = tokio::time::interval(request.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(url = %request.url, %context, interval = ?request.interval, "Fragment polling started");

        loop {
            interval.tick().await;

            match source.fetch(&request.url, request.format).await {
                Ok(fragment) => {
                    tracing::trace!(url = %request.url, "Fragment loaded");
                    on_success(&fragment);
                    events.trigger(&PageEvent::FragmentLoaded {
                        url: request.url.clone(),
                    });
                }
                Err(e) => {
                    tracing::warn!(url = %request.url, error = %e, "Fragment fetch failed");
                    on_failure(&e, &request.placeholder_message);
                    events.trigger(&PageEvent::FragmentFailed {
                        url: request.url.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
    })
}
