//! Worker pool
//!
//! Independent tokio tasks per channel. Each task dequeues one delivery, runs
//! the matching pipeline to completion and acks it before pulling again.
//! Cancellation is only observed between jobs.

use mtag_common::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{AnalysisPipeline, PipelineOutcome, TagCommitPipeline};
use crate::db::{Channel, Dispatcher};

/// Consumers for the analysis and processing channels
#[derive(Clone)]
pub struct WorkerPool {
    dispatcher: Arc<dyn Dispatcher>,
    analysis: Arc<AnalysisPipeline>,
    tag_commit: Arc<TagCommitPipeline>,
    analysis_workers: usize,
    processing_workers: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        analysis: Arc<AnalysisPipeline>,
        tag_commit: Arc<TagCommitPipeline>,
    ) -> Self {
        Self {
            dispatcher,
            analysis,
            tag_commit,
            analysis_workers: 1,
            processing_workers: 1,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_workers(mut self, analysis_workers: usize, processing_workers: usize) -> Self {
        self.analysis_workers = analysis_workers.max(1);
        self.processing_workers = processing_workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Take one delivery from `channel` and run it
    ///
    /// Returns `Ok(None)` when the channel has nothing deliverable. A store or
    /// dispatcher error leaves the delivery un-acked so it is redelivered once
    /// its lease expires.
    pub async fn process_next(&self, channel: Channel) -> Result<Option<PipelineOutcome>> {
        let Some(delivery) = self.dispatcher.dequeue(channel).await? else {
            return Ok(None);
        };

        let outcome = match channel {
            Channel::Analysis => self.analysis.run(delivery.job_id).await?,
            Channel::Processing => self.tag_commit.run(delivery.job_id).await?,
        };

        self.dispatcher.ack(&delivery).await?;
        Ok(Some(outcome))
    }

    /// Process deliveries on both channels until neither has work left
    ///
    /// Returns the number of deliveries handled.
    pub async fn drain(&self) -> Result<usize> {
        let mut handled = 0;
        loop {
            let mut progressed = false;
            for channel in Channel::ALL {
                while self.process_next(channel).await?.is_some() {
                    handled += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(handled);
            }
        }
    }

    /// Spawn all worker tasks; they exit once `shutdown` is cancelled
    pub fn spawn(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.analysis_workers + self.processing_workers);

        let workers = std::iter::repeat(Channel::Analysis)
            .take(self.analysis_workers)
            .chain(std::iter::repeat(Channel::Processing).take(self.processing_workers));

        for (index, channel) in workers.enumerate() {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                pool.worker_loop(index, channel, shutdown).await;
            }));
        }

        tracing::info!(
            analysis_workers = self.analysis_workers,
            processing_workers = self.processing_workers,
            "Worker pool started"
        );
        handles
    }

    async fn worker_loop(&self, index: usize, channel: Channel, shutdown: CancellationToken) {
        tracing::debug!(worker = index, channel = %channel, "Worker started");

        while !shutdown.is_cancelled() {
            match self.process_next(channel).await {
                Ok(Some(outcome)) => {
                    tracing::debug!(worker = index, channel = %channel, ?outcome, "Delivery handled");
                }
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.dispatcher.wait(self.poll_interval) => {}
                    }
                }
                Err(err) => {
                    tracing::error!(
                        worker = index,
                        channel = %channel,
                        error = %err,
                        "Worker step failed, delivery left for redelivery"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        tracing::debug!(worker = index, channel = %channel, "Worker stopped");
    }
}
