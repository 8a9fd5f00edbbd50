//! Test Helper Utilities
//!
//! Shared utilities for mtag-worker integration tests
#![allow(dead_code)]

pub mod audio_generator;
pub mod db_utils;
pub mod fakes;

// Re-export commonly used items
pub use audio_generator::{generate_test_wav, AudioConfig};
pub use db_utils::{create_test_env, create_test_env_with_lease, test_config, test_engine, TestEnv};
pub use fakes::{candidate, FakeFingerprinter, Fakes, MemoryTagStore, ScriptedRecognition, StaticEnrichment};
