//! # Music Tagger Common Library
//!
//! Shared code for the music tagger worker and its tooling:
//! - Error taxonomy (store, dispatcher and job lifecycle errors)
//! - Configuration loading (TOML + environment + compiled defaults)
//! - SQLite pool initialization and schema
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use config::TaggerConfig;
pub use error::{Error, Result};
