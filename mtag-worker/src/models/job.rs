//! Job lifecycle state machine
//!
//! A job moves through a single enumerated state. The historical
//! `(queue, status)` vocabulary is kept as a projection for stats and the
//! review API.
//!
//! ```text
//! AnalysisPending ──claim──▶ AnalysisProcessing ──┬─ conf ≥ threshold ─▶ ProcessingPending
//!        ▲                                        ├─ conf < threshold ─▶ ReviewPending
//!        │ retry                                  └─ failure ──────────▶ Failed
//!      Failed ◀── write fails ── ProcessingProcessing ◀──claim── ProcessingPending
//!                                      │                              ▲
//!                                      └──write ok──▶ Done            │ approve
//!                                             ReviewRejected ◀─reject─ ReviewPending
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::{MatchedMeta, TrackMeta};

/// Stable job identifier (never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token handed out by a successful claim
///
/// Every claim of a job bumps its counter, so a worker whose claim was
/// recovered by the sweep and re-issued can no longer finish the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claim(pub i64);

impl fmt::Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for an analysis worker (initial state)
    AnalysisPending,
    /// Claimed by an analysis worker
    AnalysisProcessing,
    /// Low-confidence match awaiting a human decision
    ReviewPending,
    /// Match rejected by a reviewer (terminal)
    ReviewRejected,
    /// Waiting for a tag-commit worker
    ProcessingPending,
    /// Claimed by a tag-commit worker
    ProcessingProcessing,
    /// Tags written (terminal)
    Done,
    /// Pipeline failed; terminal unless retried
    Failed,
}

/// Queue projection of a state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    Analysis,
    Review,
    Processing,
    Done,
    Failed,
}

/// Status projection of a state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Processing,
    Done,
    Failed,
    Rejected,
}

impl JobState {
    pub const ALL: [JobState; 8] = [
        JobState::AnalysisPending,
        JobState::AnalysisProcessing,
        JobState::ReviewPending,
        JobState::ReviewRejected,
        JobState::ProcessingPending,
        JobState::ProcessingProcessing,
        JobState::Done,
        JobState::Failed,
    ];

    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::AnalysisPending => "analysis_pending",
            JobState::AnalysisProcessing => "analysis_processing",
            JobState::ReviewPending => "review_pending",
            JobState::ReviewRejected => "review_rejected",
            JobState::ProcessingPending => "processing_pending",
            JobState::ProcessingProcessing => "processing_processing",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }

    pub fn queue(&self) -> Queue {
        match self {
            JobState::AnalysisPending | JobState::AnalysisProcessing => Queue::Analysis,
            JobState::ReviewPending | JobState::ReviewRejected => Queue::Review,
            JobState::ProcessingPending | JobState::ProcessingProcessing => Queue::Processing,
            JobState::Done => Queue::Done,
            JobState::Failed => Queue::Failed,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            JobState::AnalysisPending | JobState::ReviewPending | JobState::ProcessingPending => {
                Status::Pending
            }
            JobState::AnalysisProcessing | JobState::ProcessingProcessing => Status::Processing,
            JobState::ReviewRejected => Status::Rejected,
            JobState::Done => Status::Done,
            JobState::Failed => Status::Failed,
        }
    }

    /// Done and ReviewRejected never move again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::ReviewRejected)
    }

    /// Claimed by an in-flight worker execution
    pub fn is_claimed(&self) -> bool {
        self.status() == Status::Processing
    }

    /// Pending state a stale claim is returned to by the sweep
    pub fn recovery_target(&self) -> Option<JobState> {
        match self {
            JobState::AnalysisProcessing => Some(JobState::AnalysisPending),
            JobState::ProcessingProcessing => Some(JobState::ProcessingPending),
            _ => None,
        }
    }

    /// Whether `self -> next` is an edge of the state machine
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, next),
            (AnalysisPending, AnalysisProcessing)
                | (AnalysisProcessing, ProcessingPending)
                | (AnalysisProcessing, ReviewPending)
                | (AnalysisProcessing, Failed)
                | (ReviewPending, ProcessingPending)
                | (ReviewPending, ReviewRejected)
                | (ProcessingPending, ProcessingProcessing)
                | (ProcessingProcessing, Done)
                | (ProcessingProcessing, Failed)
                | (Failed, AnalysisPending)
                // stale-claim recovery
                | (AnalysisProcessing, AnalysisPending)
                | (ProcessingProcessing, ProcessingPending)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown job state: {}", s))
    }
}

/// Unit of work tracking one file through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Target file; at most one job per path
    pub path: String,
    pub state: JobState,
    /// 0-100, set once a match is found
    pub confidence: Option<f64>,
    /// Tags found in the file before analysis
    pub current_meta: Option<TrackMeta>,
    /// Proposed replacement tags; meaningful only with `confidence`
    pub matched_meta: Option<MatchedMeta>,
    /// Human-readable failure description
    pub error: Option<String>,
    /// Most recent claim issued for this job
    pub claim: Claim,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn queue(&self) -> Queue {
        self.state.queue()
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }
}

/// Write applied to one nullable column during a transition
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldUpdate<T> {
    /// Leave the column as is
    #[default]
    Keep,
    Set(T),
    /// Write NULL
    Clear,
}

/// Column writes and extra guards carried by a conditional transition
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub confidence: FieldUpdate<f64>,
    pub current_meta: FieldUpdate<TrackMeta>,
    pub matched_meta: FieldUpdate<MatchedMeta>,
    pub error: FieldUpdate<String>,
    /// Only apply if `updated_at` is strictly older than this instant
    pub updated_before: Option<DateTime<Utc>>,
    /// Only apply while this is still the job's current claim
    pub claim: Option<Claim>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = FieldUpdate::Set(confidence);
        self
    }

    pub fn current_meta(mut self, meta: Option<TrackMeta>) -> Self {
        self.current_meta = match meta {
            Some(meta) => FieldUpdate::Set(meta),
            None => FieldUpdate::Clear,
        };
        self
    }

    pub fn matched_meta(mut self, meta: MatchedMeta) -> Self {
        self.matched_meta = FieldUpdate::Set(meta);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = FieldUpdate::Set(message.into());
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = FieldUpdate::Clear;
        self
    }

    /// Drop any previous match so a restarted analysis starts clean
    pub fn clear_match(mut self) -> Self {
        self.confidence = FieldUpdate::Clear;
        self.matched_meta = FieldUpdate::Clear;
        self
    }

    pub fn updated_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.updated_before = Some(cutoff);
        self
    }

    pub fn claimed(mut self, claim: Claim) -> Self {
        self.claim = Some(claim);
        self
    }
}
