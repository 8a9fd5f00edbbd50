//! Fixed-shape tag metadata records
//!
//! `TrackMeta` is what the file carried before analysis, `MatchedMeta` is the
//! proposed replacement plus provenance, and `TagFields` is what the tag
//! writer is handed. Absent fields are never written.

use serde::{Deserialize, Serialize};

/// Tags read from the file before analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMeta {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track_number: Option<u32>,
    pub date: Option<String>,
    /// Best-effort read failure; absence of metadata is not an error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_error: Option<String>,
}

impl TrackMeta {
    /// Snapshot recording a failed read
    pub fn unreadable(message: impl Into<String>) -> Self {
        Self {
            read_error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Proposed replacement tags with match provenance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchedMeta {
    pub title: Option<String>,
    /// Artist names joined with ", "
    pub artist: Option<String>,
    pub album: Option<String>,
    pub date: Option<String>,
    pub release_group_id: Option<String>,
    pub recording_id: Option<String>,
    /// 0-100
    pub confidence: f64,
}

/// Generic fields handed to the tag writer
///
/// Only `Some` fields are written; everything else in the container is
/// preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFields {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub date: Option<String>,
}

impl TagFields {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none() && self.date.is_none()
    }
}

impl From<&MatchedMeta> for TagFields {
    fn from(meta: &MatchedMeta) -> Self {
        Self {
            title: non_empty(&meta.title),
            artist: non_empty(&meta.artist),
            album: non_empty(&meta.album),
            date: non_empty(&meta.date),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
