//! Job store
//!
//! Durable record of every job. After creation, `set_processing` and
//! `transition` are the only mutating entry points: a compare-and-swap on the
//! full job state, so two racing writers can never both succeed. Leaving a
//! claimed state also compares the claim token, so a claim that was recovered
//! and re-issued cannot be finished by its previous owner.

use chrono::{DateTime, Utc};
use mtag_common::time::{now, parse_db_timestamp, to_db_timestamp};
use mtag_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Encode, QueryBuilder, Row, Sqlite, SqlitePool, Type};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::models::{Claim, FieldUpdate, Job, JobId, JobState, JobUpdate, Queue};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const JOB_COLUMNS: &str =
    "id, path, state, confidence, current_meta, matched_meta, error, claim, created_at, updated_at";

/// Largest page the list views will return
pub const MAX_PER_PAGE: u32 = 200;

/// SQLite-backed job store
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

/// Job count per state (every state present, zero-filled)
pub type StateCounts = BTreeMap<JobState, i64>;

/// Dashboard counters: pending work per queue plus terminal totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub analysis: i64,
    pub review: i64,
    pub processing: i64,
    pub failed: i64,
    pub done: i64,
    pub rejected: i64,
}

impl QueueStats {
    pub fn from_counts(counts: &StateCounts) -> Self {
        let count = |state: JobState| counts.get(&state).copied().unwrap_or(0);
        Self {
            analysis: count(JobState::AnalysisPending),
            review: count(JobState::ReviewPending),
            processing: count(JobState::ProcessingPending),
            failed: count(JobState::Failed),
            done: count(JobState::Done),
            rejected: count(JobState::ReviewRejected),
        }
    }
}

/// Paginated listing views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListView {
    Analysis,
    Review,
    Processing,
    Failed,
    Done,
    Rejected,
}

impl ListView {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListView::Analysis => "analysis",
            ListView::Review => "review",
            ListView::Processing => "processing",
            ListView::Failed => "failed",
            ListView::Done => "done",
            ListView::Rejected => "rejected",
        }
    }

    /// States shown by this view
    pub fn states(&self) -> Vec<JobState> {
        let queue = match self {
            ListView::Analysis => Queue::Analysis,
            ListView::Review => Queue::Review,
            ListView::Processing => Queue::Processing,
            ListView::Failed => Queue::Failed,
            ListView::Done => return vec![JobState::Done],
            ListView::Rejected => return vec![JobState::ReviewRejected],
        };
        JobState::ALL
            .into_iter()
            .filter(|state| state.queue() == queue)
            .collect()
    }

    fn order_by(&self) -> &'static str {
        match self {
            ListView::Done | ListView::Rejected => "updated_at DESC, id DESC",
            _ => "confidence DESC, created_at ASC, id ASC",
        }
    }
}

impl fmt::Display for ListView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListView {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "analysis" => Ok(ListView::Analysis),
            "review" => Ok(ListView::Review),
            "processing" => Ok(ListView::Processing),
            "failed" => Ok(ListView::Failed),
            "done" => Ok(ListView::Done),
            "rejected" => Ok(ListView::Rejected),
            other => Err(Error::InvalidInput(format!("Unknown queue view: {}", other))),
        }
    }
}

/// One page of a list view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPage {
    pub view: ListView,
    pub jobs: Vec<Job>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    /// Override the bound on lock-retry time for writes
    pub fn with_max_lock_wait_ms(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new job in `AnalysisPending`
    ///
    /// Fails with `DuplicatePath` if a job for `path` already exists.
    pub async fn create(&self, path: &str) -> Result<JobId> {
        let timestamp = to_db_timestamp(now());
        let state = JobState::AnalysisPending.as_str();

        let result = retry_on_lock("create job", self.max_lock_wait_ms, || async {
            sqlx::query(
                "INSERT INTO jobs (path, state, created_at, updated_at) VALUES (?, ?, ?, ?)",
            )
            .bind(path)
            .bind(state)
            .bind(&timestamp)
            .bind(&timestamp)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)
        })
        .await;

        match result {
            Ok(done) => {
                let id = JobId(done.last_insert_rowid());
                tracing::info!(job_id = %id, path, state, "Job created");
                Ok(id)
            }
            Err(Error::Database(err))
                if err
                    .as_database_error()
                    .map(|db_err| db_err.is_unique_violation())
                    .unwrap_or(false) =>
            {
                Err(Error::DuplicatePath(path.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// Current snapshot of a job, if it exists
    pub async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// Like `get`, but a missing job is `JobNotFound`
    pub async fn require(&self, id: JobId) -> Result<Job> {
        self.get(id).await?.ok_or(Error::JobNotFound(id.0))
    }

    pub async fn find_by_path(&self, path: &str) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs WHERE path = ?", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// Conditional state transition
    ///
    /// Applies only if the row is currently in `expected` (and, when
    /// `update.updated_before` is set, was last touched before that instant).
    /// Returns rows affected: 1 on success, 0 if the precondition failed or the
    /// job does not exist. Edges outside the state machine are rejected with
    /// `InvalidTransition` without touching the database.
    ///
    /// Leaving a claimed state requires `update.claim`; the write applies only
    /// while that claim is still the job's current one.
    pub async fn transition(
        &self,
        id: JobId,
        expected: JobState,
        next: JobState,
        update: JobUpdate,
    ) -> Result<u64> {
        if !expected.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: expected.to_string(),
                to: next.to_string(),
            });
        }
        if expected.is_claimed() && update.claim.is_none() {
            return Err(Error::InvalidInput(format!(
                "Leaving {} requires the claim token",
                expected
            )));
        }

        let updated_at = to_db_timestamp(now());
        let current_meta = encode_json(update.current_meta)?;
        let matched_meta = encode_json(update.matched_meta)?;
        let updated_before = update.updated_before.map(to_db_timestamp);

        let rows = retry_on_lock("job transition", self.max_lock_wait_ms, || async {
            let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE jobs SET state = ");
            query.push_bind(next.as_str());
            query.push(", updated_at = ");
            query.push_bind(updated_at.clone());
            push_column(&mut query, "confidence", &update.confidence);
            push_column(&mut query, "current_meta", &current_meta);
            push_column(&mut query, "matched_meta", &matched_meta);
            push_column(&mut query, "error", &update.error);
            query.push(" WHERE id = ");
            query.push_bind(id.0);
            query.push(" AND state = ");
            query.push_bind(expected.as_str());
            if let Some(cutoff) = &updated_before {
                query.push(" AND updated_at < ");
                query.push_bind(cutoff.clone());
            }
            if let Some(claim) = update.claim {
                query.push(" AND claim = ");
                query.push_bind(claim.0);
            }

            let done = query
                .build()
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
            Ok(done.rows_affected())
        })
        .await?;

        if rows == 1 {
            tracing::info!(job_id = %id, from = %expected, to = %next, "Job transitioned");
        } else {
            tracing::debug!(
                job_id = %id,
                expected = %expected,
                to = %next,
                "Transition precondition failed"
            );
        }

        Ok(rows)
    }

    /// Claim a pending job for a worker
    ///
    /// `pending` must be `AnalysisPending` or `ProcessingPending`. Returns the
    /// new claim token, or `None` if the job is not in that state any more, in
    /// which case the caller must abort. The token must accompany the
    /// transition that ends the claim.
    pub async fn set_processing(&self, id: JobId, pending: JobState) -> Result<Option<Claim>> {
        let claimed = match pending {
            JobState::AnalysisPending => JobState::AnalysisProcessing,
            JobState::ProcessingPending => JobState::ProcessingProcessing,
            other => {
                return Err(Error::InvalidTransition {
                    from: other.to_string(),
                    to: "processing".to_string(),
                })
            }
        };

        let updated_at = to_db_timestamp(now());
        let claim = retry_on_lock("job claim", self.max_lock_wait_ms, || async {
            sqlx::query_scalar::<_, i64>(
                "UPDATE jobs SET state = ?, updated_at = ?, claim = claim + 1 \
                 WHERE id = ? AND state = ? RETURNING claim",
            )
            .bind(claimed.as_str())
            .bind(&updated_at)
            .bind(id.0)
            .bind(pending.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)
        })
        .await?
        .map(Claim);

        match claim {
            Some(claim) => {
                tracing::info!(job_id = %id, from = %pending, to = %claimed, claim = %claim, "Job claimed");
            }
            None => tracing::debug!(job_id = %id, expected = %pending, "Claim precondition failed"),
        }

        Ok(claim)
    }

    /// Count of jobs per state
    pub async fn stats(&self) -> Result<StateCounts> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS count FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut counts: StateCounts = JobState::ALL.into_iter().map(|s| (s, 0)).collect();
        for row in rows {
            let state: String = row.try_get("state")?;
            let count: i64 = row.try_get("count")?;
            let state = state.parse::<JobState>().map_err(Error::Internal)?;
            counts.insert(state, count);
        }
        Ok(counts)
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        Ok(QueueStats::from_counts(&self.stats().await?))
    }

    /// One page of a list view (pages start at 1)
    pub async fn list(&self, view: ListView, page: u32, per_page: u32) -> Result<JobPage> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PER_PAGE);
        let offset = i64::from(page - 1) * i64::from(per_page);
        let states = view.states();

        let mut count_query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM jobs WHERE state IN (");
        push_states(&mut count_query, &states);
        count_query.push(")");
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut list_query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM jobs WHERE state IN (", JOB_COLUMNS));
        push_states(&mut list_query, &states);
        list_query.push(format!(") ORDER BY {} LIMIT ", view.order_by()));
        list_query.push_bind(i64::from(per_page));
        list_query.push(" OFFSET ");
        list_query.push_bind(offset);

        let rows = list_query.build().fetch_all(&self.pool).await?;
        let jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>>>()?;

        let per_page_i64 = i64::from(per_page);
        Ok(JobPage {
            view,
            jobs,
            page,
            per_page,
            total,
            total_pages: (total + per_page_i64 - 1) / per_page_i64,
        })
    }

    /// Claimed jobs whose last update is older than `cutoff`
    pub async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE state IN (?, ?) AND updated_at < ? ORDER BY updated_at ASC",
            JOB_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(JobState::AnalysisProcessing.as_str())
            .bind(JobState::ProcessingProcessing.as_str())
            .bind(to_db_timestamp(cutoff))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Pending jobs older than `cutoff` with no entry left on their channel
    ///
    /// Happens when a process dies between a transition and its enqueue.
    pub async fn list_undelivered(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        let sql = format!(
            r#"
            SELECT {} FROM jobs
            WHERE updated_at < ?
              AND ((state = ? AND NOT EXISTS (
                        SELECT 1 FROM dispatch_queue d WHERE d.job_id = jobs.id AND d.channel = 'analysis'))
                OR (state = ? AND NOT EXISTS (
                        SELECT 1 FROM dispatch_queue d WHERE d.job_id = jobs.id AND d.channel = 'processing')))
            ORDER BY id ASC
            "#,
            JOB_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(to_db_timestamp(cutoff))
            .bind(JobState::AnalysisPending.as_str())
            .bind(JobState::ProcessingPending.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(job_from_row).collect()
    }
}

fn push_column<'args, T>(
    query: &mut QueryBuilder<'args, Sqlite>,
    column: &str,
    update: &FieldUpdate<T>,
) where
    T: 'args + Clone + Encode<'args, Sqlite> + Type<Sqlite>,
{
    match update {
        FieldUpdate::Keep => {}
        FieldUpdate::Set(value) => {
            query.push(format!(", {} = ", column));
            query.push_bind(value.clone());
        }
        FieldUpdate::Clear => {
            query.push(format!(", {} = NULL", column));
        }
    }
}

fn push_states(query: &mut QueryBuilder<'_, Sqlite>, states: &[JobState]) {
    let mut separated = query.separated(", ");
    for state in states {
        separated.push_bind(state.as_str());
    }
}

fn encode_json<T: Serialize>(update: FieldUpdate<T>) -> Result<FieldUpdate<String>> {
    Ok(match update {
        FieldUpdate::Keep => FieldUpdate::Keep,
        FieldUpdate::Clear => FieldUpdate::Clear,
        FieldUpdate::Set(value) => FieldUpdate::Set(
            serde_json::to_string(&value)
                .map_err(|e| Error::Internal(format!("Failed to serialize metadata: {}", e)))?,
        ),
    })
}

fn decode_json<T: serde::de::DeserializeOwned>(column: &str, raw: Option<String>) -> Result<Option<T>> {
    raw.map(|text| {
        serde_json::from_str(&text)
            .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", column, e)))
    })
    .transpose()
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let state: String = row.try_get("state")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Job {
        id: JobId(row.try_get("id")?),
        path: row.try_get("path")?,
        state: state.parse().map_err(Error::Internal)?,
        confidence: row.try_get("confidence")?,
        current_meta: decode_json("current_meta", row.try_get("current_meta")?)?,
        matched_meta: decode_json("matched_meta", row.try_get("matched_meta")?)?,
        error: row.try_get("error")?,
        claim: Claim(row.try_get("claim")?),
        created_at: parse_db_timestamp(&created_at)?,
        updated_at: parse_db_timestamp(&updated_at)?,
    })
}
