//! mtag worker library
//!
//! Job lifecycle engine for the music tagger: job store, dispatch queue,
//! analysis and tag-commit pipelines, worker pool, producers and the review
//! API. The `mtag` binary wires these together.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use mtag_common::{Error, Result, TaggerConfig};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::db::{Dispatcher, JobStore, SqliteDispatcher};
use crate::services::{AcoustIdClient, FpcalcFingerprinter, LoftyTagStore, MusicBrainzClient};
use crate::workflow::{AnalysisPipeline, Collaborators, PipelineConfig, Producer, TagCommitPipeline, WorkerPool};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: JobStore,
    pub producer: Producer,
    pub config: Arc<TaggerConfig>,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(store: JobStore, dispatcher: Arc<dyn Dispatcher>, config: Arc<TaggerConfig>) -> Self {
        Self {
            producer: Producer::new(store.clone(), dispatcher),
            store,
            config,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::job_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Everything a running instance needs, opened from configuration
pub struct Engine {
    pub config: Arc<TaggerConfig>,
    pub store: JobStore,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub producer: Producer,
    pub workers: WorkerPool,
}

impl Engine {
    /// Open the job database and build the production collaborators
    pub async fn open(config: TaggerConfig) -> Result<Self> {
        let pool = mtag_common::db::init_database(&config.database_path()).await?;
        let store = JobStore::new(pool.clone());
        let dispatcher: Arc<dyn Dispatcher> =
            Arc::new(SqliteDispatcher::new(pool, config.delivery_lease()));

        if !config.has_acoustid_api_key() {
            tracing::warn!("No AcoustID API key configured; every analysis will fail until one is set");
        }

        let collaborators = Collaborators {
            fingerprinter: Arc::new(FpcalcFingerprinter::new(config.fpcalc_path.clone())),
            recognition: Arc::new(
                AcoustIdClient::new(config.acoustid_api_key.clone())
                    .map_err(|e| Error::Internal(e.to_string()))?,
            ),
            enrichment: Arc::new(MusicBrainzClient::new().map_err(|e| Error::Internal(e.to_string()))?),
            tags: Arc::new(LoftyTagStore::new()),
        };

        Ok(Self::with_collaborators(config, store, dispatcher, collaborators))
    }

    /// Assemble an engine around existing store, dispatcher and collaborators
    pub fn with_collaborators(
        config: TaggerConfig,
        store: JobStore,
        dispatcher: Arc<dyn Dispatcher>,
        collaborators: Collaborators,
    ) -> Self {
        let pipeline_config = PipelineConfig::from(&config);

        let analysis = Arc::new(AnalysisPipeline::new(
            store.clone(),
            dispatcher.clone(),
            collaborators.clone(),
            pipeline_config.clone(),
        ));
        let tag_commit = Arc::new(TagCommitPipeline::new(store.clone(), collaborators, pipeline_config));
        let workers = WorkerPool::new(dispatcher.clone(), analysis, tag_commit)
            .with_workers(config.analysis_workers, config.processing_workers)
            .with_poll_interval(config.poll_interval());

        Self {
            producer: Producer::new(store.clone(), dispatcher.clone()),
            config: Arc::new(config),
            store,
            dispatcher,
            workers,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.store.clone(), self.dispatcher.clone(), self.config.clone())
    }
}
