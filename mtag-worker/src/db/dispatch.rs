//! Durable at-least-once dispatch queue
//!
//! Job ids are persisted per channel in the job database. `dequeue` leases the
//! oldest deliverable row with a single `UPDATE ... RETURNING`, so one delivery
//! goes to exactly one consumer at a time. A delivery that is never acked
//! becomes visible again once its lease expires.

use async_trait::async_trait;
use mtag_common::time::{now, to_chrono_duration, to_db_timestamp};
use mtag_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::models::{JobId, JobState};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Delivery lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Analysis,
    Processing,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Analysis, Channel::Processing];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Analysis => "analysis",
            Channel::Processing => "processing",
        }
    }

    /// Channel that delivers jobs waiting in `state`
    pub fn for_pending(state: JobState) -> Option<Channel> {
        match state {
            JobState::AnalysisPending => Some(Channel::Analysis),
            JobState::ProcessingPending => Some(Channel::Processing),
            _ => None,
        }
    }

    /// State a job must be in to be claimed from this channel
    pub fn pending_state(&self) -> JobState {
        match self {
            Channel::Analysis => JobState::AnalysisPending,
            Channel::Processing => JobState::ProcessingPending,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "analysis" => Ok(Channel::Analysis),
            "processing" => Ok(Channel::Processing),
            other => Err(Error::InvalidInput(format!("Unknown channel: {}", other))),
        }
    }
}

/// A leased job id; must be acked once the pipeline step has finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub id: i64,
    pub channel: Channel,
    pub job_id: JobId,
    /// How many times this entry has been handed out, including this one
    pub deliveries: i64,
}

/// Named at-least-once work queue
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Persist `job_id` for delivery on `channel`
    async fn enqueue(&self, channel: Channel, job_id: JobId) -> Result<()>;

    /// Lease the next deliverable entry, if any
    async fn dequeue(&self, channel: Channel) -> Result<Option<Delivery>>;

    /// Remove a finished delivery
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Entries not yet acked (leased or not)
    async fn pending(&self, channel: Channel) -> Result<i64>;

    /// Wait until something may have been enqueued or `timeout` elapses
    async fn wait(&self, timeout: Duration);
}

/// Dispatcher backed by the `dispatch_queue` table
#[derive(Clone)]
pub struct SqliteDispatcher {
    pool: SqlitePool,
    lease: Duration,
    notify: Arc<Notify>,
    max_lock_wait_ms: u64,
}

impl SqliteDispatcher {
    pub fn new(pool: SqlitePool, lease: Duration) -> Self {
        Self {
            pool,
            lease,
            notify: Arc::new(Notify::new()),
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }
}

#[async_trait]
impl Dispatcher for SqliteDispatcher {
    async fn enqueue(&self, channel: Channel, job_id: JobId) -> Result<()> {
        let enqueued_at = to_db_timestamp(now());

        retry_on_lock("enqueue", self.max_lock_wait_ms, || async {
            sqlx::query(
                "INSERT INTO dispatch_queue (channel, job_id, enqueued_at) VALUES (?, ?, ?)",
            )
            .bind(channel.as_str())
            .bind(job_id.0)
            .bind(&enqueued_at)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
            Ok(())
        })
        .await?;

        tracing::debug!(channel = %channel, job_id = %job_id, "Enqueued");
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, channel: Channel) -> Result<Option<Delivery>> {
        let current = now();
        let now_text = to_db_timestamp(current);
        let lease_until = to_db_timestamp(current + to_chrono_duration(self.lease));

        let row = retry_on_lock("dequeue", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                UPDATE dispatch_queue
                SET lease_until = ?, deliveries = deliveries + 1
                WHERE id = (
                    SELECT id FROM dispatch_queue
                    WHERE channel = ? AND (lease_until IS NULL OR lease_until < ?)
                    ORDER BY id
                    LIMIT 1
                )
                RETURNING id, job_id, deliveries
                "#,
            )
            .bind(&lease_until)
            .bind(channel.as_str())
            .bind(&now_text)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)
        })
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let delivery = Delivery {
            id: row.try_get("id")?,
            channel,
            job_id: JobId(row.try_get("job_id")?),
            deliveries: row.try_get("deliveries")?,
        };

        if delivery.deliveries > 1 {
            tracing::info!(
                channel = %channel,
                job_id = %delivery.job_id,
                deliveries = delivery.deliveries,
                "Redelivering expired lease"
            );
        }

        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        retry_on_lock("ack", self.max_lock_wait_ms, || async {
            sqlx::query("DELETE FROM dispatch_queue WHERE id = ?")
                .bind(delivery.id)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
            Ok(())
        })
        .await
    }

    async fn pending(&self, channel: Channel) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dispatch_queue WHERE channel = ?")
            .bind(channel.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn wait(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}
