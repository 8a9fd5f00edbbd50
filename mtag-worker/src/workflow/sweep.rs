//! Stale-claim sweep
//!
//! A worker that dies mid-pipeline leaves its job claimed. The sweep returns
//! claims older than the staleness threshold to their pending state and
//! re-enqueues them. The recovery transition is guarded by the listed claim
//! token and `updated_before`, so a sweep never steals a job that made progress
//! or was claimed again after it was listed. A worker still running on a
//! recovered claim loses it: its closing transition no longer matches.
//! Pending jobs whose delivery was lost (enqueue never happened) are
//! re-enqueued as well.

use mtag_common::time::{now, to_chrono_duration};
use mtag_common::Result;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::db::{Channel, Dispatcher, JobStore};
use crate::models::JobUpdate;

/// Totals from one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale claims returned to pending and re-enqueued
    pub recovered: usize,
    /// Pending jobs re-enqueued because no delivery was outstanding
    pub redelivered: usize,
}

/// One sweep pass
pub async fn sweep_stale(
    store: &JobStore,
    dispatcher: &dyn Dispatcher,
    stale_after: Duration,
) -> Result<SweepReport> {
    let cutoff = now() - to_chrono_duration(stale_after);
    let mut report = SweepReport::default();

    for job in store.list_stale(cutoff).await? {
        let Some(pending) = job.state.recovery_target() else {
            continue;
        };
        let Some(channel) = Channel::for_pending(pending) else {
            continue;
        };

        let rows = store
            .transition(
                job.id,
                job.state,
                pending,
                JobUpdate::new().claimed(job.claim).updated_before(cutoff),
            )
            .await?;
        if rows == 1 {
            dispatcher.enqueue(channel, job.id).await?;
            tracing::warn!(
                job_id = %job.id,
                path = %job.path,
                from = %job.state,
                "Recovered stale claim"
            );
            report.recovered += 1;
        }
    }

    for job in store.list_undelivered(cutoff).await? {
        if let Some(channel) = Channel::for_pending(job.state) {
            dispatcher.enqueue(channel, job.id).await?;
            tracing::warn!(job_id = %job.id, channel = %channel, "Re-enqueued undelivered job");
            report.redelivered += 1;
        }
    }

    if report != SweepReport::default() {
        tracing::info!(
            recovered = report.recovered,
            redelivered = report.redelivered,
            "Sweep complete"
        );
    }

    Ok(report)
}

/// Sweep every `interval` until `shutdown` is cancelled
pub async fn run_sweep_loop(
    store: JobStore,
    dispatcher: std::sync::Arc<dyn Dispatcher>,
    interval: Duration,
    stale_after: Duration,
    shutdown: CancellationToken,
) {
    loop {
        if let Err(err) = sweep_stale(&store, dispatcher.as_ref(), stale_after).await {
            tracing::error!(error = %err, "Stale sweep failed");
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    tracing::debug!("Sweep loop stopped");
}
