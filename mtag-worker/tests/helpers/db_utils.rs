//! Database Test Utilities
//!
//! File-backed temporary job databases. In-memory SQLite gives every pooled
//! connection its own database, so tests always use a file.

use mtag_common::TaggerConfig;
use mtag_worker::db::{Dispatcher, JobStore, SqliteDispatcher};
use mtag_worker::Engine;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use super::fakes::Fakes;

/// Temporary database with a store and dispatcher on top of it
///
/// `dir` must be kept alive for the duration of the test.
pub struct TestEnv {
    pub dir: TempDir,
    pub store: JobStore,
    pub dispatcher: Arc<dyn Dispatcher>,
}

/// Create a test environment with a five minute delivery lease
pub async fn create_test_env() -> TestEnv {
    create_test_env_with_lease(Duration::from_secs(300)).await
}

pub async fn create_test_env_with_lease(lease: Duration) -> TestEnv {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let pool = mtag_common::db::init_database(&dir.path().join("test_mtag.db"))
        .await
        .expect("Failed to initialize test database");

    TestEnv {
        dir,
        store: JobStore::new(pool.clone()),
        dispatcher: Arc::new(SqliteDispatcher::new(pool, lease)),
    }
}

/// Configuration with no artificial delays
pub fn test_config(confidence_threshold: u8) -> TaggerConfig {
    TaggerConfig {
        confidence_threshold,
        rate_limit_delay_secs: 0.0,
        write_delay_secs: 0.0,
        poll_interval_ms: 20,
        ..TaggerConfig::default()
    }
}

/// Engine over the test database wired to fake collaborators
pub fn test_engine(env: &TestEnv, fakes: &Fakes, confidence_threshold: u8) -> Engine {
    Engine::with_collaborators(
        test_config(confidence_threshold),
        env.store.clone(),
        env.dispatcher.clone(),
        fakes.collaborators(),
    )
}
