//! Analysis pipeline
//!
//! Claims an `AnalysisPending` job, identifies the file and routes it by
//! confidence: at or above the threshold straight to tag commit, below it to
//! human review. The routing transition and the processing enqueue form one
//! logical step; nothing is enqueued if the transition did not apply.

use mtag_common::Result;
use std::path::Path;
use std::sync::Arc;

use super::{Collaborators, PipelineConfig, PipelineError, PipelineOutcome};
use crate::db::{Channel, Dispatcher, JobStore};
use crate::models::{Claim, Job, JobId, JobState, JobUpdate, MatchedMeta, TrackMeta};
use crate::services::{Candidate, ReleaseGroup};

/// Highest-scoring candidate carrying a release group id
///
/// Ties keep the candidate the service listed first.
pub fn select_best(candidates: &[Candidate]) -> Option<(&Candidate, &ReleaseGroup)> {
    let mut best: Option<(&Candidate, &ReleaseGroup)> = None;

    for candidate in candidates {
        let Some(group) = candidate
            .recording
            .release_groups
            .iter()
            .find(|group| !group.id.trim().is_empty())
        else {
            continue;
        };

        let better = match best {
            Some((current, _)) => candidate.score > current.score,
            None => true,
        };
        if better {
            best = Some((candidate, group));
        }
    }

    best
}

/// Proposed tags for the chosen candidate (date filled in by enrichment)
pub fn matched_meta_for(candidate: &Candidate, group: &ReleaseGroup) -> MatchedMeta {
    let artists: Vec<&str> = candidate
        .recording
        .artists
        .iter()
        .map(String::as_str)
        .filter(|name| !name.is_empty())
        .collect();

    MatchedMeta {
        title: candidate.recording.title.clone(),
        artist: (!artists.is_empty()).then(|| artists.join(", ")),
        album: group.title.clone(),
        date: None,
        release_group_id: Some(group.id.clone()),
        recording_id: candidate.recording.id.clone(),
        confidence: candidate.score,
    }
}

/// Destination for a match of the given confidence
pub fn route(confidence: f64, threshold: u8) -> JobState {
    if confidence >= f64::from(threshold) {
        JobState::ProcessingPending
    } else {
        JobState::ReviewPending
    }
}

/// Fingerprint → recognition → best match → routing
pub struct AnalysisPipeline {
    store: JobStore,
    dispatcher: Arc<dyn Dispatcher>,
    collaborators: Collaborators,
    config: PipelineConfig,
}

impl AnalysisPipeline {
    pub fn new(
        store: JobStore,
        dispatcher: Arc<dyn Dispatcher>,
        collaborators: Collaborators,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            collaborators,
            config,
        }
    }

    /// Run analysis for one delivered job id
    ///
    /// Only store and dispatcher errors are returned as `Err`.
    pub async fn run(&self, id: JobId) -> Result<PipelineOutcome> {
        let Some(job) = self.store.get(id).await? else {
            tracing::warn!(job_id = %id, "Analysis delivery for unknown job");
            return Ok(PipelineOutcome::Missing);
        };

        let Some(claim) = self.store.set_processing(id, JobState::AnalysisPending).await? else {
            tracing::debug!(job_id = %id, state = %job.state, "Analysis claim conflict, skipping");
            return Ok(PipelineOutcome::Skipped);
        };

        let current_meta = self.read_current_meta(&job).await;

        match self.identify(&job).await {
            Ok(matched) => self.commit_match(id, claim, current_meta, matched).await,
            Err(err) => {
                tracing::warn!(job_id = %id, path = %job.path, error = %err, "Analysis failed");
                let update = JobUpdate::new()
                    .claimed(claim)
                    .current_meta(current_meta)
                    .error(err.to_string());
                let rows = self
                    .store
                    .transition(id, JobState::AnalysisProcessing, JobState::Failed, update)
                    .await?;
                Ok(finished_or_skipped(id, rows, JobState::Failed))
            }
        }
    }

    /// Best-effort snapshot of the file's existing tags
    async fn read_current_meta(&self, job: &Job) -> Option<TrackMeta> {
        match self.collaborators.tags.read_tags(Path::new(&job.path)).await {
            Ok(meta) => meta,
            Err(err) => {
                tracing::debug!(job_id = %job.id, error = %err, "Could not read current tags");
                Some(TrackMeta::unreadable(err.to_string()))
            }
        }
    }

    async fn identify(&self, job: &Job) -> std::result::Result<MatchedMeta, PipelineError> {
        let fingerprint = self
            .collaborators
            .fingerprinter
            .fingerprint(Path::new(&job.path))
            .await
            .map_err(|err| {
                tracing::debug!(job_id = %job.id, error = %err, "Fingerprinting failed");
                PipelineError::FingerprintFailure
            })?;

        tokio::time::sleep(self.config.rate_limit_delay).await;

        let candidates = self
            .collaborators
            .recognition
            .lookup(&fingerprint)
            .await
            .map_err(|err| PipelineError::RecognitionServiceError(err.to_string()))?;

        let (candidate, group) = select_best(&candidates).ok_or(PipelineError::NoMatchFound)?;
        let mut matched = matched_meta_for(candidate, group);

        tokio::time::sleep(self.config.rate_limit_delay).await;

        match self.collaborators.enrichment.release_details(&group.id).await {
            Ok(Some(details)) => {
                matched.date = details.first_release_date.filter(|date| !date.is_empty());
            }
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(
                    job_id = %job.id,
                    release_group_id = %group.id,
                    error = %err,
                    "Release enrichment failed, leaving date empty"
                );
            }
        }

        Ok(matched)
    }

    async fn commit_match(
        &self,
        id: JobId,
        claim: Claim,
        current_meta: Option<TrackMeta>,
        matched: MatchedMeta,
    ) -> Result<PipelineOutcome> {
        let confidence = matched.confidence;
        let target = route(confidence, self.config.confidence_threshold);

        let update = JobUpdate::new()
            .claimed(claim)
            .confidence(confidence)
            .current_meta(current_meta)
            .matched_meta(matched)
            .clear_error();
        let rows = self
            .store
            .transition(id, JobState::AnalysisProcessing, target, update)
            .await?;

        if rows == 1 {
            if target == JobState::ProcessingPending {
                self.dispatcher.enqueue(Channel::Processing, id).await?;
            }
            tracing::info!(job_id = %id, confidence, state = %target, "Analysis routed");
        }

        Ok(finished_or_skipped(id, rows, target))
    }
}

fn finished_or_skipped(id: JobId, rows: u64, state: JobState) -> PipelineOutcome {
    if rows == 1 {
        PipelineOutcome::Finished(state)
    } else {
        tracing::warn!(job_id = %id, "Claim lost before analysis result could be stored");
        PipelineOutcome::Skipped
    }
}
