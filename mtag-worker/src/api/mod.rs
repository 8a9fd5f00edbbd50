//! Review API
//!
//! Thin JSON surface over the job store and producer actions.

pub mod health;
pub mod jobs;

pub use health::health_routes;
pub use jobs::job_routes;
