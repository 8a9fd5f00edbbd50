//! Data models for the job lifecycle
//!
//! - Job state machine and conditional-update payloads
//! - Fixed-shape tag metadata records

pub mod job;
pub mod metadata;

pub use job::{Claim, FieldUpdate, Job, JobId, JobState, JobUpdate, Queue, Status};
pub use metadata::{MatchedMeta, TagFields, TrackMeta};
