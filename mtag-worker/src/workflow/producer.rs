//! Producer operations
//!
//! Job creation, seeding and the review actions. Each is a conditional
//! transition followed, on success only, by an enqueue.

use mtag_common::{Error, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::db::{Channel, Dispatcher, JobStore};
use crate::models::{JobId, JobState, JobUpdate};
use crate::services::{FileScanner, ScanError};

/// Outcome of a seeding run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    /// Music files found under the scanned folder
    pub discovered: usize,
    /// Files queued for analysis (or that would be, on a dry run)
    pub queued: usize,
    /// Files whose job is already past analysis
    pub skipped: usize,
}

/// Store + dispatcher front-end for seeding and review actions
#[derive(Clone)]
pub struct Producer {
    store: JobStore,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Producer {
    pub fn new(store: JobStore, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Create a job for `path` and queue it for analysis
    pub async fn create_job(&self, path: &str) -> Result<JobId> {
        let id = self.store.create(path).await?;
        self.dispatcher.enqueue(Channel::Analysis, id).await?;
        Ok(id)
    }

    /// Accept a reviewed match and queue it for tag commit
    pub async fn approve(&self, id: JobId) -> Result<()> {
        self.apply(id, JobState::ReviewPending, JobState::ProcessingPending, JobUpdate::new())
            .await?;
        self.dispatcher.enqueue(Channel::Processing, id).await?;
        tracing::info!(job_id = %id, "Job approved");
        Ok(())
    }

    /// Reject a reviewed match; terminal
    pub async fn reject(&self, id: JobId) -> Result<()> {
        self.apply(id, JobState::ReviewPending, JobState::ReviewRejected, JobUpdate::new())
            .await?;
        tracing::info!(job_id = %id, "Job rejected");
        Ok(())
    }

    /// Restart a failed job from the beginning
    pub async fn retry(&self, id: JobId) -> Result<()> {
        let update = JobUpdate::new().clear_error().clear_match();
        self.apply(id, JobState::Failed, JobState::AnalysisPending, update)
            .await?;
        self.dispatcher.enqueue(Channel::Analysis, id).await?;
        tracing::info!(job_id = %id, "Job retried");
        Ok(())
    }

    /// Approve each id; returns how many actually moved
    pub async fn approve_many(&self, ids: &[JobId]) -> Result<usize> {
        let mut approved = 0;
        for &id in ids {
            match self.approve(id).await {
                Ok(()) => approved += 1,
                Err(err @ (Error::JobNotFound(_) | Error::ClaimConflict { .. })) => {
                    tracing::debug!(job_id = %id, error = %err, "Skipping bulk approve");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(approved)
    }

    /// Reject each id; returns how many actually moved
    pub async fn reject_many(&self, ids: &[JobId]) -> Result<usize> {
        let mut rejected = 0;
        for &id in ids {
            match self.reject(id).await {
                Ok(()) => rejected += 1,
                Err(err @ (Error::JobNotFound(_) | Error::ClaimConflict { .. })) => {
                    tracing::debug!(job_id = %id, error = %err, "Skipping bulk reject");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(rejected)
    }

    /// Queue every music file under `music_dir` (or its `artist` folder)
    ///
    /// New files get a job; jobs still waiting for analysis are re-queued and
    /// failed jobs are retried. Everything else is skipped. A dry run counts
    /// without writing.
    pub async fn seed(&self, music_dir: &Path, artist: Option<&str>, dry_run: bool) -> Result<SeedSummary> {
        let scan_root = match artist {
            Some(artist) => {
                let artist_dir = music_dir.join(artist);
                if !artist_dir.is_dir() {
                    tracing::warn!(path = %artist_dir.display(), "Artist folder not found");
                    return Ok(SeedSummary::default());
                }
                artist_dir
            }
            None => music_dir.to_path_buf(),
        };

        let files = FileScanner::new().scan(&scan_root).map_err(|err| match err {
            ScanError::PathNotFound(path) => {
                Error::NotFound(format!("Music directory not found: {}", path.display()))
            }
            other => Error::InvalidInput(other.to_string()),
        })?;

        let mut summary = SeedSummary {
            discovered: files.len(),
            ..SeedSummary::default()
        };
        tracing::info!(root = %scan_root.display(), files = files.len(), dry_run, "Seeding");

        for file in files {
            let path = file.to_string_lossy().to_string();

            let queued = match self.store.find_by_path(&path).await? {
                None if dry_run => true,
                None => match self.create_job(&path).await {
                    Ok(_) => true,
                    // Created concurrently by another producer; that one enqueues it
                    Err(Error::DuplicatePath(_)) => false,
                    Err(err) => return Err(err),
                },
                Some(job) => match job.state {
                    JobState::AnalysisPending => {
                        if !dry_run {
                            self.dispatcher.enqueue(Channel::Analysis, job.id).await?;
                        }
                        true
                    }
                    JobState::Failed if dry_run => true,
                    JobState::Failed => match self.retry(job.id).await {
                        Ok(()) => true,
                        Err(Error::ClaimConflict { .. }) => false,
                        Err(err) => return Err(err),
                    },
                    _ => false,
                },
            };

            if queued {
                summary.queued += 1;
                if dry_run {
                    tracing::info!(path = %path, "Would queue");
                }
            } else {
                summary.skipped += 1;
            }
        }

        tracing::info!(
            discovered = summary.discovered,
            queued = summary.queued,
            skipped = summary.skipped,
            dry_run,
            "Seeding complete"
        );
        Ok(summary)
    }

    /// Conditional transition that reports why it did not apply
    async fn apply(&self, id: JobId, from: JobState, to: JobState, update: JobUpdate) -> Result<()> {
        let rows = self.store.transition(id, from, to, update).await?;
        if rows == 1 {
            return Ok(());
        }

        match self.store.get(id).await? {
            None => Err(Error::JobNotFound(id.0)),
            Some(_) => Err(Error::ClaimConflict {
                job_id: id.0,
                expected: from.to_string(),
            }),
        }
    }
}
