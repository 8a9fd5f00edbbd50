//! Tag container access using lofty
//!
//! Reads the primary (else first) tag of a file and writes the generic
//! title/artist/album/date fields. Fields absent from `TagFields` are left as
//! they are in the container.

use async_trait::async_trait;
use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::{TagFields, TrackMeta};

/// Extensions whose tag containers can be read and written
pub const TAGGABLE_EXTENSIONS: &[&str] = &["mp3", "flac", "m4a", "mp4", "ogg", "opus", "wav", "aiff"];

/// Tag access errors
#[derive(Debug, Error)]
pub enum TagError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read tags: {0}")]
    Read(String),

    #[error("Failed to write tags: {0}")]
    Write(String),

    #[error("Tag task failed: {0}")]
    Task(String),
}

/// Reads and writes a file's tag container
#[async_trait]
pub trait TagStore: Send + Sync {
    /// `Ok(None)` when the format has no supported tag container
    async fn read_tags(&self, path: &Path) -> Result<Option<TrackMeta>, TagError>;

    /// Write only the `Some` fields of `fields`
    async fn write_tags(&self, path: &Path, fields: &TagFields) -> Result<(), TagError>;
}

/// Lower-cased extension if it is one we can tag
pub fn taggable_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    TAGGABLE_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Snapshot the generic fields of a tag
pub fn track_meta_from_tag(tag: &Tag) -> TrackMeta {
    let date = tag
        .get_string(&ItemKey::RecordingDate)
        .map(str::to_string)
        .or_else(|| tag.year().map(|year| year.to_string()));

    TrackMeta {
        artist: tag.artist().map(|s| s.to_string()),
        album: tag.album().map(|s| s.to_string()),
        title: tag.title().map(|s| s.to_string()),
        track_number: tag.track(),
        date,
        read_error: None,
    }
}

/// Apply the present fields to a tag, leaving the rest untouched
pub fn apply_fields(tag: &mut Tag, fields: &TagFields) {
    if let Some(title) = &fields.title {
        tag.set_title(title.clone());
    }
    if let Some(artist) = &fields.artist {
        tag.set_artist(artist.clone());
    }
    if let Some(album) = &fields.album {
        tag.set_album(album.clone());
    }
    if let Some(date) = &fields.date {
        tag.insert_text(ItemKey::RecordingDate, date.clone());
    }
}

fn read_blocking(path: &Path) -> Result<Option<TrackMeta>, TagError> {
    if taggable_extension(path).is_none() {
        return Ok(None);
    }

    let tagged_file = Probe::open(path)
        .map_err(|e| TagError::Read(e.to_string()))?
        .read()
        .map_err(|e| TagError::Read(e.to_string()))?;

    let meta = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())
        .map(track_meta_from_tag)
        .unwrap_or_default();

    Ok(Some(meta))
}

fn write_blocking(path: &Path, fields: &TagFields) -> Result<(), TagError> {
    let Some(_) = taggable_extension(path) else {
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        return Err(TagError::UnsupportedFormat(ext));
    };

    let mut tagged_file = Probe::open(path)
        .map_err(|e| TagError::Write(e.to_string()))?
        .read()
        .map_err(|e| TagError::Write(e.to_string()))?;

    if tagged_file.primary_tag().is_none() {
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(Tag::new(tag_type));
    }

    let tag = tagged_file
        .primary_tag_mut()
        .ok_or_else(|| TagError::Write("no writable tag container".to_string()))?;
    apply_fields(tag, fields);

    tagged_file
        .save_to_path(path, WriteOptions::default())
        .map_err(|e| TagError::Write(e.to_string()))
}

/// Tag store backed by lofty; blocking file I/O runs on the blocking pool
#[derive(Debug, Clone, Default)]
pub struct LoftyTagStore;

impl LoftyTagStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TagStore for LoftyTagStore {
    async fn read_tags(&self, path: &Path) -> Result<Option<TrackMeta>, TagError> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || read_blocking(&path))
            .await
            .map_err(|e| TagError::Task(e.to_string()))?
    }

    async fn write_tags(&self, path: &Path, fields: &TagFields) -> Result<(), TagError> {
        let path: PathBuf = path.to_path_buf();
        let fields = fields.clone();
        tokio::task::spawn_blocking(move || write_blocking(&path, &fields))
            .await
            .map_err(|e| TagError::Task(e.to_string()))?
    }
}
