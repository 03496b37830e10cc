//! Overpass implementation of [`RegionQueryClient`].
//!
//! Builds an Overpass QL query for one bounding box, posts it, and maps
//! transport and service errors into the three-way failure taxonomy. The
//! query string sent upstream is owned here; nothing else in the engine
//! knows the wire format.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use strandline_core::BoundingBox;
use thiserror::Error;

use crate::client::{CollectionOutcome, ElementKind, FailureKind, RawElement, RegionQueryClient};

/// Public Overpass API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://overpass-api.de/api/interpreter";

/// Default user agent for Overpass requests.
pub const DEFAULT_USER_AGENT: &str = "strandline-collect/0.1";

/// Default per-query deadline in seconds, mirrored into the QL header so
/// the server gives up at the same time we do.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Configuration for [`OverpassClient`].
#[derive(Debug, Clone)]
pub struct OverpassConfig {
    /// Endpoint accepting Overpass QL posts.
    pub base_url: String,
    /// Per-query deadline.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Tag key the query selects on, e.g. `natural`.
    pub selector_key: String,
    /// Tag value the query selects on, e.g. `beach`.
    pub selector_value: String,
}

impl Default for OverpassConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            selector_key: "natural".to_owned(),
            selector_value: "beach".to_owned(),
        }
    }
}

impl OverpassConfig {
    /// Create a configuration with the given endpoint.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the per-query deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent string.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Select a different feature tag.
    #[must_use]
    pub fn with_selector(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.selector_key = key.into();
        self.selector_value = value.into();
        self
    }
}

/// Error type for [`OverpassClient`] construction failures.
#[derive(Debug, Error)]
pub enum ClientBuildError {
    /// Building the underlying HTTP client failed.
    #[error("failed to build HTTP client: {source}")]
    HttpClient {
        /// Source error returned by `reqwest`.
        #[source]
        source: reqwest::Error,
    },
}

/// HTTP client for the Overpass spatial query API.
#[derive(Debug)]
pub struct OverpassClient {
    client: Client,
    config: OverpassConfig,
}

impl OverpassClient {
    /// Create a client against the public endpoint with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] if the HTTP client fails to build.
    pub fn new() -> Result<Self, ClientBuildError> {
        Self::with_config(OverpassConfig::default())
    }

    /// Create a client with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] if the HTTP client fails to build.
    pub fn with_config(config: OverpassConfig) -> Result<Self, ClientBuildError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|source| ClientBuildError::HttpClient { source })?;
        Ok(Self { client, config })
    }

    /// Render the Overpass QL query for one bounding box. Overpass bbox
    /// order is `(south, west, north, east)`.
    fn build_query(&self, region: &BoundingBox) -> String {
        let bbox = format!(
            "({},{},{},{})",
            region.south(),
            region.west(),
            region.north(),
            region.east()
        );
        let key = &self.config.selector_key;
        let value = &self.config.selector_value;
        format!(
            "[out:json][timeout:{timeout}];\n(\n  way[\"{key}\"=\"{value}\"]{bbox};\n  relation[\"{key}\"=\"{value}\"]{bbox};\n);\nout body center;\n",
            timeout = self.config.timeout.as_secs(),
        )
    }
}

#[async_trait]
impl RegionQueryClient for OverpassClient {
    async fn query(&self, region: &BoundingBox) -> CollectionOutcome {
        let query = self.build_query(region);
        let response = match self
            .client
            .post(&self.config.base_url)
            .body(query)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                log::warn!("request for {} failed: {err}", region.display_name());
                return CollectionOutcome::Failure(classify_request_error(&err));
            }
        };

        if let Some(kind) = classify_status(response.status()) {
            log::warn!(
                "{} returned HTTP {} for {}",
                self.config.base_url,
                response.status(),
                region.display_name()
            );
            return CollectionOutcome::Failure(kind);
        }

        let parsed: OverpassResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(err) => {
                log::warn!(
                    "failed to decode response for {}: {err}",
                    region.display_name()
                );
                let kind = if err.is_timeout() {
                    FailureKind::Timeout
                } else {
                    FailureKind::Other
                };
                return CollectionOutcome::Failure(kind);
            }
        };

        if let Some(kind) = parsed.remark.as_deref().and_then(classify_remark) {
            log::warn!(
                "service remark for {}: {:?}",
                region.display_name(),
                parsed.remark
            );
            return CollectionOutcome::Failure(kind);
        }

        let elements: Vec<RawElement> = parsed
            .elements
            .into_iter()
            .filter_map(OverpassElement::into_raw)
            .collect();
        if elements.is_empty() {
            CollectionOutcome::Empty
        } else {
            CollectionOutcome::Records(elements)
        }
    }
}

fn classify_request_error(error: &reqwest::Error) -> FailureKind {
    if error.is_timeout() {
        FailureKind::Timeout
    } else {
        FailureKind::Other
    }
}

/// Map an HTTP status onto the failure taxonomy; `None` means success.
fn classify_status(status: StatusCode) -> Option<FailureKind> {
    if status.is_success() {
        return None;
    }
    match status {
        StatusCode::TOO_MANY_REQUESTS => Some(FailureKind::RateLimited),
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => Some(FailureKind::Timeout),
        _ => Some(FailureKind::Other),
    }
}

/// Overpass reports query-runtime problems as a `remark` on an otherwise
/// successful response.
fn classify_remark(remark: &str) -> Option<FailureKind> {
    let lowered = remark.to_lowercase();
    if lowered.contains("timed out") || lowered.contains("timeout") {
        return Some(FailureKind::Timeout);
    }
    if lowered.contains("rate_limited") || lowered.contains("too many") {
        return Some(FailureKind::RateLimited);
    }
    None
}

/// Overpass API response envelope.
#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
    /// Present when the server aborted or truncated the query.
    remark: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    kind: String,
    id: i64,
    lat: Option<f64>,
    lon: Option<f64>,
    center: Option<OverpassCenter>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct OverpassCenter {
    lat: f64,
    lon: f64,
}

impl OverpassElement {
    fn into_raw(self) -> Option<RawElement> {
        let kind = match self.kind.as_str() {
            "node" => ElementKind::Node,
            "way" => ElementKind::Way,
            "relation" => ElementKind::Relation,
            other => {
                log::debug!("ignoring unknown element type {other:?}");
                return None;
            }
        };
        Some(RawElement {
            kind,
            id: self.id,
            latitude: self.lat,
            longitude: self.lon,
            center: self.center.map(|c| (c.lat, c.lon)),
            tags: self.tags,
        })
    }
}
