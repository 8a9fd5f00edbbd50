//! In-process collaborators
//!
//! Deterministic stand-ins for fpcalc, AcoustID, MusicBrainz and the tag
//! container. Everything is keyed by file path.

use async_trait::async_trait;
use mtag_worker::models::{TagFields, TrackMeta};
use mtag_worker::services::{
    Candidate, EnrichmentError, Fingerprint, FingerprintError, Fingerprinter, RecognitionError,
    RecognitionService, Recording, ReleaseDetails, ReleaseEnrichment, ReleaseGroup, TagError, TagStore,
};
use mtag_worker::workflow::Collaborators;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const FINGERPRINT_PREFIX: &str = "fp:";

/// Candidate with one artist and one release group
pub fn candidate(score: f64, title: &str, artist: &str, release_group_id: &str, album: &str) -> Candidate {
    Candidate {
        score,
        recording: Recording {
            id: Some(format!("rec-{}", title.to_lowercase().replace(' ', "-"))),
            title: Some(title.to_string()),
            artists: vec![artist.to_string()],
            release_groups: vec![ReleaseGroup {
                id: release_group_id.to_string(),
                title: Some(album.to_string()),
            }],
        },
    }
}

/// Fingerprints every file unless told to fail for it
#[derive(Default)]
pub struct FakeFingerprinter {
    failing: Mutex<HashSet<PathBuf>>,
    calls: AtomicUsize,
}

impl FakeFingerprinter {
    pub fn fail_for(&self, path: impl AsRef<Path>) {
        self.failing.lock().unwrap().insert(path.as_ref().to_path_buf());
    }

    pub fn succeed_for(&self, path: impl AsRef<Path>) {
        self.failing.lock().unwrap().remove(path.as_ref());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fingerprinter for FakeFingerprinter {
    async fn fingerprint(&self, path: &Path) -> Result<Fingerprint, FingerprintError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(path) {
            return Err(FingerprintError::InvalidOutput("unreadable audio".to_string()));
        }
        Ok(Fingerprint {
            fingerprint: format!("{}{}", FINGERPRINT_PREFIX, path.display()),
            duration_secs: 215.4,
        })
    }
}

/// Returns scripted candidates per file; unknown files have no match
#[derive(Default)]
pub struct ScriptedRecognition {
    responses: Mutex<HashMap<String, Vec<Candidate>>>,
    errors: Mutex<HashMap<String, String>>,
    calls: AtomicUsize,
}

impl ScriptedRecognition {
    pub fn respond(&self, path: impl AsRef<Path>, candidates: Vec<Candidate>) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.as_ref().display().to_string(), candidates);
    }

    pub fn fail(&self, path: impl AsRef<Path>, message: &str) {
        self.errors
            .lock()
            .unwrap()
            .insert(path.as_ref().display().to_string(), message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognitionService for ScriptedRecognition {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Vec<Candidate>, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = fingerprint
            .fingerprint
            .strip_prefix(FINGERPRINT_PREFIX)
            .unwrap_or(&fingerprint.fingerprint);

        if let Some(message) = self.errors.lock().unwrap().get(path) {
            return Err(RecognitionError::Network(message.clone()));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default())
    }
}

/// First-release dates per release group id
#[derive(Default)]
pub struct StaticEnrichment {
    dates: Mutex<HashMap<String, String>>,
    failing: Mutex<bool>,
}

impl StaticEnrichment {
    pub fn set_date(&self, release_group_id: &str, date: &str) {
        self.dates
            .lock()
            .unwrap()
            .insert(release_group_id.to_string(), date.to_string());
    }

    pub fn fail_all(&self) {
        *self.failing.lock().unwrap() = true;
    }
}

#[async_trait]
impl ReleaseEnrichment for StaticEnrichment {
    async fn release_details(&self, release_group_id: &str) -> Result<Option<ReleaseDetails>, EnrichmentError> {
        if *self.failing.lock().unwrap() {
            return Err(EnrichmentError::RateLimited);
        }
        Ok(self
            .dates
            .lock()
            .unwrap()
            .get(release_group_id)
            .map(|date| ReleaseDetails {
                title: None,
                first_release_date: Some(date.clone()),
            }))
    }
}

/// Tag containers held in memory
#[derive(Default)]
pub struct MemoryTagStore {
    tags: Mutex<HashMap<PathBuf, TrackMeta>>,
    failing_writes: Mutex<HashMap<PathBuf, String>>,
    writes: Mutex<Vec<(PathBuf, TagFields)>>,
}

impl MemoryTagStore {
    pub fn set_tags(&self, path: impl AsRef<Path>, meta: TrackMeta) {
        self.tags.lock().unwrap().insert(path.as_ref().to_path_buf(), meta);
    }

    pub fn tags(&self, path: impl AsRef<Path>) -> Option<TrackMeta> {
        self.tags.lock().unwrap().get(path.as_ref()).cloned()
    }

    pub fn fail_writes_for(&self, path: impl AsRef<Path>, message: &str) {
        self.failing_writes
            .lock()
            .unwrap()
            .insert(path.as_ref().to_path_buf(), message.to_string());
    }

    pub fn allow_writes_for(&self, path: impl AsRef<Path>) {
        self.failing_writes.lock().unwrap().remove(path.as_ref());
    }

    /// Every successful write in order
    pub fn writes(&self) -> Vec<(PathBuf, TagFields)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TagStore for MemoryTagStore {
    async fn read_tags(&self, path: &Path) -> Result<Option<TrackMeta>, TagError> {
        Ok(self.tags.lock().unwrap().get(path).cloned())
    }

    async fn write_tags(&self, path: &Path, fields: &TagFields) -> Result<(), TagError> {
        if let Some(message) = self.failing_writes.lock().unwrap().get(path) {
            return Err(TagError::Write(message.clone()));
        }

        let mut tags = self.tags.lock().unwrap();
        let entry = tags.entry(path.to_path_buf()).or_default();
        if let Some(title) = &fields.title {
            entry.title = Some(title.clone());
        }
        if let Some(artist) = &fields.artist {
            entry.artist = Some(artist.clone());
        }
        if let Some(album) = &fields.album {
            entry.album = Some(album.clone());
        }
        if let Some(date) = &fields.date {
            entry.date = Some(date.clone());
        }
        drop(tags);

        self.writes
            .lock()
            .unwrap()
            .push((path.to_path_buf(), fields.clone()));
        Ok(())
    }
}

/// One of each fake, shared with the pipelines through `Collaborators`
#[derive(Clone, Default)]
pub struct Fakes {
    pub fingerprinter: Arc<FakeFingerprinter>,
    pub recognition: Arc<ScriptedRecognition>,
    pub enrichment: Arc<StaticEnrichment>,
    pub tags: Arc<MemoryTagStore>,
}

impl Fakes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            fingerprinter: self.fingerprinter.clone(),
            recognition: self.recognition.clone(),
            enrichment: self.enrichment.clone(),
            tags: self.tags.clone(),
        }
    }
}
