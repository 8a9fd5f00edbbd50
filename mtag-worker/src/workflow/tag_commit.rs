//! Tag-commit pipeline
//!
//! Claims a `ProcessingPending` job and writes its matched fields into the
//! file. Used for both auto-committed and approved jobs.

use mtag_common::Result;
use std::path::Path;

use super::{Collaborators, PipelineConfig, PipelineError, PipelineOutcome};
use crate::db::JobStore;
use crate::models::{Job, JobId, JobState, JobUpdate, TagFields};

pub struct TagCommitPipeline {
    store: JobStore,
    collaborators: Collaborators,
    config: PipelineConfig,
}

impl TagCommitPipeline {
    pub fn new(store: JobStore, collaborators: Collaborators, config: PipelineConfig) -> Self {
        Self {
            store,
            collaborators,
            config,
        }
    }

    /// Run tag commit for one delivered job id
    pub async fn run(&self, id: JobId) -> Result<PipelineOutcome> {
        let Some(job) = self.store.get(id).await? else {
            tracing::warn!(job_id = %id, "Processing delivery for unknown job");
            return Ok(PipelineOutcome::Missing);
        };

        let Some(claim) = self.store.set_processing(id, JobState::ProcessingPending).await? else {
            tracing::debug!(job_id = %id, state = %job.state, "Processing claim conflict, skipping");
            return Ok(PipelineOutcome::Skipped);
        };

        let (target, update) = match self.write(&job).await {
            Ok(()) => (JobState::Done, JobUpdate::new().clear_error()),
            Err(err) => {
                tracing::warn!(job_id = %id, path = %job.path, error = %err, "Tag write failed");
                (JobState::Failed, JobUpdate::new().error(err.to_string()))
            }
        };

        let rows = self
            .store
            .transition(id, JobState::ProcessingProcessing, target, update.claimed(claim))
            .await?;

        if rows != 1 {
            tracing::warn!(job_id = %id, "Claim lost before tag result could be stored");
            return Ok(PipelineOutcome::Skipped);
        }

        if target == JobState::Done {
            tracing::info!(job_id = %id, path = %job.path, "Tags written");
            tokio::time::sleep(self.config.write_delay).await;
        }

        Ok(PipelineOutcome::Finished(target))
    }

    async fn write(&self, job: &Job) -> std::result::Result<(), PipelineError> {
        let matched = job.matched_meta.as_ref().ok_or(PipelineError::MissingMatch)?;
        let fields = TagFields::from(matched);

        self.collaborators
            .tags
            .write_tags(Path::new(&job.path), &fields)
            .await
            .map_err(|err| PipelineError::TagWriteFailure(err.to_string()))
    }
}
