//! Job lifecycle workflow
//!
//! - **Analysis**: fingerprint → recognition → best match → confidence routing
//! - **Tag commit**: write the matched fields back to the file
//! - **Worker pool**: channel consumers running one pipeline step at a time
//! - **Sweep**: recovery of claims abandoned by a dead worker
//! - **Producers**: seeding and review actions (approve / reject / retry)
//!
//! Every state change goes through `JobStore::transition`. Pipeline-internal
//! failures never escape a pipeline: they become a `Failed` transition
//! carrying the message. Only store and dispatcher errors propagate.

pub mod analysis;
pub mod producer;
pub mod sweep;
pub mod tag_commit;
pub mod worker_pool;

use mtag_common::TaggerConfig;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::JobState;
use crate::services::{Fingerprinter, RecognitionService, ReleaseEnrichment, TagStore};

pub use analysis::AnalysisPipeline;
pub use producer::{Producer, SeedSummary};
pub use sweep::{run_sweep_loop, sweep_stale, SweepReport};
pub use tag_commit::TagCommitPipeline;
pub use worker_pool::WorkerPool;

/// Failures that move a job to `Failed`; `Display` is the stored error text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("fingerprint failure")]
    FingerprintFailure,

    #[error("no match")]
    NoMatchFound,

    #[error("recognition service error: {0}")]
    RecognitionServiceError(String),

    #[error("{0}")]
    TagWriteFailure(String),

    #[error("no matched metadata to write")]
    MissingMatch,
}

/// Result of running one pipeline step for a delivered job id
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// The job does not exist; the delivery is stale
    Missing,
    /// Another actor owns or already moved the job
    Skipped,
    /// The step finished and left the job in this state
    Finished(JobState),
}

/// Tunables shared by both pipelines
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Confidence at or above which a match skips review
    pub confidence_threshold: u8,
    /// Delay before each remote lookup
    pub rate_limit_delay: Duration,
    /// Settle delay after a successful tag write
    pub write_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&TaggerConfig::default())
    }
}

impl From<&TaggerConfig> for PipelineConfig {
    fn from(config: &TaggerConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            rate_limit_delay: config.rate_limit_delay(),
            write_delay: config.write_delay(),
        }
    }
}

/// External collaborators the pipelines call
#[derive(Clone)]
pub struct Collaborators {
    pub fingerprinter: Arc<dyn Fingerprinter>,
    pub recognition: Arc<dyn RecognitionService>,
    pub enrichment: Arc<dyn ReleaseEnrichment>,
    pub tags: Arc<dyn TagStore>,
}
