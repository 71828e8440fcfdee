//! Postgres-backed job queue.
//!
//! All queries operate on the `proof_jobs` table.
//!
//! - **Claim** selects the oldest claimable row with `FOR UPDATE SKIP LOCKED`,
//!   so concurrent workers in any number of processes never take the same
//!   job. A row is claimable when queued, or locked with an expired lease,
//!   and has attempts left.
//! - **Exhaustion**: a locked row whose lease ran out with no attempts left
//!   is failed terminally, cause `infrastructure`, by a sweep run before
//!   every claim and poll.
//! - **Reporting**: terminal rows carry `reported = FALSE` until the
//!   coordinator has taken them through [`JobQueue::next_finished`], which
//!   flips the flag in the same statement, so each outcome is delivered once.

use std::time::Duration;

use chrono::{DateTime, Utc};
use frl_core::{Collection, JobId};
use frl_queue::{
    Ack, FailureCause, FinishedJob, Job, JobKind, JobOutcome, JobPayload, JobQueue, JobState, JobStatus,
    QueueError,
};
use frl_zkp::ProofArtifact;
use sqlx::PgPool;
use uuid::Uuid;

/// [`JobQueue`] backed by the `proof_jobs` table.
#[derive(Debug, Clone)]
pub struct PgJobQueue {
    pool: PgPool,
    lock_duration: Duration,
    poll_interval: Duration,
}

impl PgJobQueue {
    /// Queue leasing claimed jobs for `lock_duration` and polling every
    /// `poll_interval` while idle.
    pub fn new(pool: PgPool, lock_duration: Duration, poll_interval: Duration) -> Self {
        Self {
            pool,
            lock_duration,
            poll_interval,
        }
    }

    /// Fail every expired lease that has no attempts left. Returns the number failed.
    pub async fn fail_exhausted(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "UPDATE proof_jobs
             SET state = 'failed',
                 failure_cause = 'infrastructure',
                 lock_until = NULL,
                 last_error = COALESCE(last_error, 'lease expired') || ' after ' || attempts || ' attempts',
                 updated_at = now()
             WHERE state = 'locked' AND lock_until <= now() AND attempts >= max_attempts",
        )
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        let n = result.rows_affected();
        if n > 0 {
            tracing::error!(jobs = n, "jobs exhausted their attempts");
            metrics::counter!("frl_jobs_failed_total", "terminal" => "true").increment(n);
        }
        Ok(n)
    }

    async fn claim_now(&self) -> Result<Option<Job>, QueueError> {
        self.fail_exhausted().await?;
        let row = sqlx::query_as::<_, JobRow>(
            "UPDATE proof_jobs
             SET state = 'locked',
                 attempts = attempts + 1,
                 lock_until = now() + make_interval(secs => $1),
                 last_error = CASE WHEN state = 'locked' THEN 'lease expired' ELSE last_error END,
                 updated_at = now()
             WHERE id = (
                 SELECT id FROM proof_jobs
                 WHERE (state = 'queued' OR (state = 'locked' AND lock_until <= now()))
                   AND attempts < max_attempts
                 ORDER BY seq
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, payload, state, attempts, max_attempts, lock_until, last_error, created_at",
        )
        .bind(self.lock_duration.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let job = row.into_job()?;
        tracing::debug!(job_id = %job.id, kind = %job.kind(), attempt = job.attempts, "job claimed");
        metrics::counter!("frl_jobs_claimed_total").increment(1);
        Ok(Some(job))
    }

    async fn take_finished(&self) -> Result<Option<FinishedJob>, QueueError> {
        self.fail_exhausted().await?;
        let row = sqlx::query_as::<_, FinishedRow>(
            "UPDATE proof_jobs
             SET reported = TRUE
             WHERE id = (
                 SELECT id FROM proof_jobs
                 WHERE reported = FALSE AND state IN ('completed', 'failed')
                 ORDER BY updated_at, seq
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, kind, collection, state, result, last_error, failure_cause, attempts",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        row.map(FinishedRow::into_finished).transpose()
    }

    /// Whether `id` exists; used to tell a duplicate report from an unknown job.
    async fn exists(&self, id: JobId) -> Result<bool, QueueError> {
        let found: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM proof_jobs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(found.is_some())
    }
}

fn unavailable(e: sqlx::Error) -> QueueError {
    QueueError::Unavailable(e.to_string())
}

fn attempts_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

#[async_trait::async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, payload: JobPayload, max_attempts: u32) -> Result<JobId, QueueError> {
        let job = Job::new(payload, max_attempts);
        let body = serde_json::to_value(&job.payload)
            .map_err(|e| QueueError::Serialization(format!("failed to serialize job payload: {e}")))?;
        let max = i32::try_from(job.max_attempts).unwrap_or(i32::MAX);

        sqlx::query(
            "INSERT INTO proof_jobs (id, kind, collection, payload, state, attempts, max_attempts, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 'queued', 0, $5, $6, $6)",
        )
        .bind(job.id.0)
        .bind(job.kind().as_str())
        .bind(job.collection().as_str())
        .bind(&body)
        .bind(max)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        tracing::debug!(job_id = %job.id, kind = %job.kind(), collection = %job.collection(), "job enqueued");
        Ok(job.id)
    }

    async fn claim(&self) -> Result<Job, QueueError> {
        loop {
            if let Some(job) = self.claim_now().await? {
                return Ok(job);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn try_claim(&self) -> Result<Option<Job>, QueueError> {
        self.claim_now().await
    }

    async fn complete(&self, id: JobId, artifact: ProofArtifact) -> Result<Ack, QueueError> {
        let result = serde_json::to_value(&artifact)
            .map_err(|e| QueueError::Serialization(format!("failed to serialize proof artifact: {e}")))?;
        let updated = sqlx::query(
            "UPDATE proof_jobs
             SET state = 'completed', result = $2, lock_until = NULL, updated_at = now()
             WHERE id = $1 AND state IN ('queued', 'locked')",
        )
        .bind(id.0)
        .bind(&result)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if updated.rows_affected() == 0 {
            if !self.exists(id).await? {
                return Err(QueueError::UnknownJob(id));
            }
            tracing::info!(job_id = %id, "duplicate completion discarded");
            return Ok(Ack::Duplicate);
        }
        metrics::counter!("frl_jobs_completed_total").increment(1);
        Ok(Ack::Applied)
    }

    async fn fail(&self, id: JobId, error: &str, retryable: bool) -> Result<Ack, QueueError> {
        let row: Option<(String, i32)> = sqlx::query_as(
            "UPDATE proof_jobs
             SET state = CASE WHEN $3 AND attempts < max_attempts THEN 'queued' ELSE 'failed' END,
                 failure_cause = CASE
                     WHEN $3 AND attempts < max_attempts THEN NULL
                     WHEN $3 THEN 'infrastructure'
                     ELSE 'rejected'
                 END,
                 last_error = $2,
                 lock_until = NULL,
                 updated_at = now()
             WHERE id = $1 AND state IN ('queued', 'locked')
             RETURNING state, attempts",
        )
        .bind(id.0)
        .bind(error)
        .bind(retryable)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        let Some((state, attempts)) = row else {
            if !self.exists(id).await? {
                return Err(QueueError::UnknownJob(id));
            }
            return Ok(Ack::Duplicate);
        };
        let terminal = state == JobState::Failed.as_str();
        metrics::counter!("frl_jobs_failed_total", "terminal" => if terminal { "true" } else { "false" })
            .increment(1);
        if terminal {
            tracing::warn!(job_id = %id, attempts, error, "job failed terminally");
        } else {
            tracing::info!(job_id = %id, attempt = attempts, error, "job requeued after failure");
        }
        Ok(Ack::Applied)
    }

    async fn next_finished(&self) -> Result<FinishedJob, QueueError> {
        loop {
            if let Some(finished) = self.take_finished().await? {
                return Ok(finished);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn get(&self, id: JobId) -> Result<Option<JobStatus>, QueueError> {
        let row = sqlx::query_as::<_, StatusRow>(
            "SELECT id, kind, collection, state, attempts, max_attempts, lock_until, last_error
             FROM proof_jobs WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        row.map(StatusRow::into_status).transpose()
    }
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    payload: serde_json::Value,
    state: String,
    attempts: i32,
    max_attempts: i32,
    lock_until: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self) -> Result<Job, QueueError> {
        let payload: JobPayload = serde_json::from_value(self.payload)
            .map_err(|e| QueueError::Serialization(format!("job {}: {e}", self.id)))?;
        let state: JobState = self.state.parse().map_err(QueueError::Serialization)?;
        Ok(Job {
            id: JobId(self.id),
            payload,
            attempts: attempts_u32(self.attempts),
            max_attempts: attempts_u32(self.max_attempts),
            lock_until: self.lock_until,
            state,
            last_error: self.last_error,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StatusRow {
    id: Uuid,
    kind: String,
    collection: String,
    state: String,
    attempts: i32,
    max_attempts: i32,
    lock_until: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl StatusRow {
    fn into_status(self) -> Result<JobStatus, QueueError> {
        Ok(JobStatus {
            id: JobId(self.id),
            kind: parse_kind(&self.kind)?,
            collection: parse_collection(self.id, &self.collection)?,
            state: self.state.parse().map_err(QueueError::Serialization)?,
            attempts: attempts_u32(self.attempts),
            max_attempts: attempts_u32(self.max_attempts),
            lock_until: self.lock_until,
            last_error: self.last_error,
        })
    }
}

fn parse_kind(kind: &str) -> Result<JobKind, QueueError> {
    match kind {
        "prove" => Ok(JobKind::Prove),
        "merge" => Ok(JobKind::Merge),
        other => Err(QueueError::Serialization(format!("unknown job kind {other:?}"))),
    }
}

fn parse_collection(id: Uuid, collection: &str) -> Result<Collection, QueueError> {
    collection
        .parse()
        .map_err(|e| QueueError::Serialization(format!("job {id}: {e}")))
}

#[derive(sqlx::FromRow)]
struct FinishedRow {
    id: Uuid,
    kind: String,
    collection: String,
    state: String,
    result: Option<serde_json::Value>,
    last_error: Option<String>,
    failure_cause: Option<String>,
    attempts: i32,
}

impl FinishedRow {
    fn into_finished(self) -> Result<FinishedJob, QueueError> {
        let kind = parse_kind(&self.kind)?;
        let collection = parse_collection(self.id, &self.collection)?;
        let state: JobState = self.state.parse().map_err(QueueError::Serialization)?;
        let outcome = match (state, self.result) {
            (JobState::Completed, Some(result)) => JobOutcome::Completed(
                serde_json::from_value(result)
                    .map_err(|e| QueueError::Serialization(format!("job {} result: {e}", self.id)))?,
            ),
            (JobState::Failed, _) => {
                let cause: FailureCause = self
                    .failure_cause
                    .as_deref()
                    .ok_or_else(|| QueueError::Serialization(format!("job {} failed without a cause", self.id)))?
                    .parse()
                    .map_err(QueueError::Serialization)?;
                JobOutcome::Failed {
                    error: self.last_error.unwrap_or_default(),
                    attempts: attempts_u32(self.attempts),
                    cause,
                }
            }
            (state, _) => {
                return Err(QueueError::Serialization(format!(
                    "job {} reported in state {}",
                    self.id,
                    state.as_str()
                )))
            }
        };
        Ok(FinishedJob {
            id: JobId(self.id),
            kind,
            collection,
            outcome,
        })
    }
}
