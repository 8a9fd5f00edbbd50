//! AcoustID API client
//!
//! Fingerprint lookup with `meta=recordings releasegroups`. Results are
//! flattened into one candidate per recording, in service order, with the
//! score rescaled to 0-100.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::services::fingerprinter::Fingerprint;

const ACOUSTID_BASE_URL: &str = "https://api.acoustid.org/v2/lookup";
const USER_AGENT: &str = concat!("mtag/", env!("CARGO_PKG_VERSION"));

/// Recognition service errors
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("AcoustID API key not set")]
    MissingApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Release group a recording appears on
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReleaseGroup {
    #[serde(default)]
    pub id: String,
    pub title: Option<String>,
}

/// Recording attached to a lookup result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recording {
    pub id: Option<String>,
    pub title: Option<String>,
    pub artists: Vec<String>,
    pub release_groups: Vec<ReleaseGroup>,
}

/// One candidate match
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// 0-100
    pub score: f64,
    pub recording: Recording,
}

/// Resolves a fingerprint into candidate matches
#[async_trait]
pub trait RecognitionService: Send + Sync {
    /// Candidates in service order; empty when nothing matched
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Vec<Candidate>, RecognitionError>;
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
    #[serde(default)]
    results: Vec<serde_json::Value>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    #[serde(default)]
    score: f64,
    #[serde(default)]
    recordings: Vec<LookupRecording>,
}

#[derive(Debug, Deserialize)]
struct LookupRecording {
    id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    artists: Vec<LookupArtist>,
    #[serde(default)]
    releasegroups: Vec<ReleaseGroup>,
}

#[derive(Debug, Deserialize)]
struct LookupArtist {
    name: String,
}

/// Flatten an AcoustID lookup response body into candidates
///
/// Results that are not JSON objects (the service occasionally returns bare
/// strings) are skipped.
pub fn parse_lookup_response(body: &str) -> Result<Vec<Candidate>, RecognitionError> {
    let response: LookupResponse =
        serde_json::from_str(body).map_err(|e| RecognitionError::Parse(e.to_string()))?;

    if response.status != "ok" {
        let (code, message) = response
            .error
            .map(|e| (e.code, e.message))
            .unwrap_or((0, format!("status {}", response.status)));
        return Err(RecognitionError::Api(code, message));
    }

    let mut candidates = Vec::new();
    for value in response.results {
        if !value.is_object() {
            continue;
        }
        let result: LookupResult = match serde_json::from_value(value) {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed AcoustID result");
                continue;
            }
        };

        for recording in result.recordings {
            candidates.push(Candidate {
                score: result.score * 100.0,
                recording: Recording {
                    id: recording.id,
                    title: recording.title,
                    artists: recording.artists.into_iter().map(|a| a.name).collect(),
                    release_groups: recording.releasegroups,
                },
            });
        }
    }

    Ok(candidates)
}

/// AcoustID API client
pub struct AcoustIdClient {
    http_client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl AcoustIdClient {
    pub fn new(api_key: Option<String>) -> Result<Self, RecognitionError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RecognitionError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            base_url: ACOUSTID_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl RecognitionService for AcoustIdClient {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Vec<Candidate>, RecognitionError> {
        let api_key = self.api_key.as_deref().ok_or(RecognitionError::MissingApiKey)?;
        let duration = fingerprint.duration_whole_secs().to_string();

        let params = [
            ("client", api_key),
            ("meta", "recordings releasegroups"),
            ("duration", duration.as_str()),
            ("fingerprint", fingerprint.fingerprint.as_str()),
        ];

        tracing::debug!(duration_secs = %duration, "Querying AcoustID API");

        let response = self
            .http_client
            .post(&self.base_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| RecognitionError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RecognitionError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(RecognitionError::Api(status.as_u16(), body));
        }

        let candidates = parse_lookup_response(&body)?;
        tracing::debug!(candidates = candidates.len(), "AcoustID lookup complete");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "status": "ok",
        "results": [
            "garbage",
            {
                "id": "a1",
                "score": 0.92,
                "recordings": [
                    {
                        "id": "rec-1",
                        "title": "Song",
                        "artists": [{"id": "ar1", "name": "Alpha"}, {"id": "ar2", "name": "Beta"}],
                        "releasegroups": [{"id": "rg-1", "title": "Album", "type": "Album"}]
                    },
                    {"id": "rec-2", "title": "Bare"}
                ]
            },
            {"id": "a2", "score": 0.4}
        ]
    }"#;

    #[test]
    fn test_parse_flattens_recordings_and_scales_score() {
        let candidates = parse_lookup_response(SAMPLE).unwrap();

        assert_eq!(candidates.len(), 2);
        assert!((candidates[0].score - 92.0).abs() < 1e-9);
        assert_eq!(candidates[0].recording.artists, vec!["Alpha", "Beta"]);
        assert_eq!(candidates[0].recording.release_groups[0].id, "rg-1");
        assert!(candidates[1].recording.release_groups.is_empty());
    }

    #[test]
    fn test_parse_empty_results() {
        let candidates = parse_lookup_response(r#"{"status":"ok","results":[]}"#).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_parse_error_status() {
        let body = r#"{"status":"error","error":{"code":4,"message":"invalid API key"}}"#;
        match parse_lookup_response(body) {
            Err(RecognitionError::Api(4, message)) => assert_eq!(message, "invalid API key"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = AcoustIdClient::new(Some("  ".to_string())).unwrap();
        let fp = Fingerprint {
            fingerprint: "AQAD".to_string(),
            duration_secs: 10.0,
        };
        assert!(matches!(
            client.lookup(&fp).await,
            Err(RecognitionError::MissingApiKey)
        ));
    }
}
