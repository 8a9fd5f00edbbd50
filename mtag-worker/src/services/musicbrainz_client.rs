//! MusicBrainz API client
//!
//! Release-group lookups used to enrich a match with its first release date.
//! MusicBrainz allows one request per second per client.

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

const MUSICBRAINZ_BASE_URL: &str = "https://musicbrainz.org/ws/2";
const USER_AGENT: &str = concat!(
    "mtag/",
    env!("CARGO_PKG_VERSION"),
    " ( https://musicbrainz.org/doc/MusicBrainz_API/Rate_Limiting )"
);

/// Enrichment errors
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
}

/// Details of a release group
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReleaseDetails {
    pub title: Option<String>,
    #[serde(rename = "first-release-date")]
    pub first_release_date: Option<String>,
}

/// Secondary lookup against a release-group id
#[async_trait]
pub trait ReleaseEnrichment: Send + Sync {
    /// `Ok(None)` when the release group is unknown
    async fn release_details(
        &self,
        release_group_id: &str,
    ) -> Result<Option<ReleaseDetails>, EnrichmentError>;
}

/// MusicBrainz API client
pub struct MusicBrainzClient {
    http_client: reqwest::Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    base_url: String,
}

impl MusicBrainzClient {
    pub fn new() -> Result<Self, EnrichmentError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EnrichmentError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::MIN)),
            base_url: MUSICBRAINZ_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Lookup URL with the id percent-encoded as a single path segment
    fn release_group_url(&self, release_group_id: &str) -> Result<reqwest::Url, EnrichmentError> {
        if release_group_id.trim().is_empty() {
            return Err(EnrichmentError::InvalidUrl("empty release group id".to_string()));
        }

        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| EnrichmentError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| EnrichmentError::InvalidUrl(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .push("release-group")
            .push(release_group_id);
        url.set_query(Some("inc=artists+releases&fmt=json"));

        Ok(url)
    }
}

#[async_trait]
impl ReleaseEnrichment for MusicBrainzClient {
    async fn release_details(
        &self,
        release_group_id: &str,
    ) -> Result<Option<ReleaseDetails>, EnrichmentError> {
        self.rate_limiter.until_ready().await;

        let url = self.release_group_url(release_group_id)?;
        tracing::debug!(release_group_id, url = %url, "Querying MusicBrainz API");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| EnrichmentError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(EnrichmentError::RateLimited);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EnrichmentError::Api(status.as_u16(), error_text));
        }

        let details: ReleaseDetails = response
            .json()
            .await
            .map_err(|e| EnrichmentError::Parse(e.to_string()))?;

        Ok(Some(details))
    }
}
