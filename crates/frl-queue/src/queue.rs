//! # Job Queue
//!
//! At-least-once delivery with leases. A claimed job is locked for the
//! configured lease; if the worker neither completes nor fails it in time,
//! the next `claim` takes it over and counts another attempt. Once a job
//! has used all its attempts an expired lease fails it terminally.
//!
//! Terminal outcomes (completion or terminal failure) are published exactly
//! once through [`JobQueue::next_finished`]. Reports for a job that has
//! already finished are acknowledged as [`Ack::Duplicate`] and dropped.
//!
//! The in-memory queue drops a job's payload as soon as it finishes; only
//! its [`JobStatus`] is kept, so late reports can still be recognised.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::Utc;
use frl_core::{FrlError, JobId};
use frl_zkp::ProofArtifact;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

use crate::job::{Ack, FailureCause, FinishedJob, Job, JobOutcome, JobPayload, JobState, JobStatus};

/// Queue failures.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The broker could not be reached or rejected the operation.
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    /// No job with this id exists.
    #[error("unknown job {0}")]
    UnknownJob(JobId),
    /// A stored payload could not be encoded or decoded.
    #[error("job payload serialization: {0}")]
    Serialization(String),
    /// The queue has been shut down.
    #[error("queue closed")]
    Closed,
}

impl From<QueueError> for FrlError {
    fn from(err: QueueError) -> Self {
        FrlError::TransientInfra(err.to_string())
    }
}

/// Durable work queue shared by the coordinator and the worker pool.
#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job. `max_attempts` bounds claims, including reclaims after a crash.
    async fn enqueue(&self, payload: JobPayload, max_attempts: u32) -> Result<JobId, QueueError>;

    /// Claim the oldest available job, waiting until one is available.
    async fn claim(&self) -> Result<Job, QueueError>;

    /// Claim the oldest available job if there is one.
    async fn try_claim(&self) -> Result<Option<Job>, QueueError>;

    /// Record success.
    async fn complete(&self, id: JobId, artifact: ProofArtifact) -> Result<Ack, QueueError>;

    /// Record failure. Retryable failures go back to the queue while attempts remain.
    async fn fail(&self, id: JobId, error: &str, retryable: bool) -> Result<Ack, QueueError>;

    /// Wait for the next terminal outcome not yet delivered.
    async fn next_finished(&self) -> Result<FinishedJob, QueueError>;

    /// Current state of a job, without its payload.
    async fn get(&self, id: JobId) -> Result<Option<JobStatus>, QueueError>;
}

#[derive(Default)]
struct Inner {
    /// Queued and locked jobs, by enqueue order.
    live: BTreeMap<u64, Job>,
    seqs: HashMap<JobId, u64>,
    /// Finished jobs without their payloads, kept to recognise late reports.
    finished: HashMap<JobId, JobStatus>,
    next_seq: u64,
}

impl Inner {
    /// The live job `id`, or `None` if it has already finished.
    fn live_mut(&mut self, id: JobId) -> Result<Option<&mut Job>, QueueError> {
        if let Some(seq) = self.seqs.get(&id) {
            return self.live.get_mut(seq).map(Some).ok_or(QueueError::UnknownJob(id));
        }
        if self.finished.contains_key(&id) {
            return Ok(None);
        }
        Err(QueueError::UnknownJob(id))
    }

    /// Move a finished job out of the live set, dropping its payload.
    fn retire(&mut self, id: JobId) -> Option<JobStatus> {
        let seq = self.seqs.remove(&id)?;
        let status = self.live.remove(&seq)?.status();
        self.finished.insert(id, status.clone());
        Some(status)
    }
}

/// Process-local queue with leases, for tests and single-node runs.
pub struct InMemoryJobQueue {
    inner: Mutex<Inner>,
    available: Notify,
    finished_tx: mpsc::UnboundedSender<FinishedJob>,
    finished_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FinishedJob>>,
    lock_duration: Duration,
    poll_interval: Duration,
}

impl InMemoryJobQueue {
    /// A queue leasing claimed jobs for `lock_duration`, rechecking expired
    /// leases every `poll_interval` while idle.
    pub fn new(lock_duration: Duration, poll_interval: Duration) -> Self {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        Self {
            inner: Mutex::new(Inner::default()),
            available: Notify::new(),
            finished_tx,
            finished_rx: tokio::sync::Mutex::new(finished_rx),
            lock_duration,
            poll_interval,
        }
    }

    /// Jobs not yet finished.
    pub fn pending(&self) -> usize {
        self.inner.lock().live.len()
    }

    fn publish(&self, status: &JobStatus, outcome: JobOutcome) {
        let finished = FinishedJob {
            id: status.id,
            kind: status.kind,
            collection: status.collection,
            outcome,
        };
        // The receiver lives as long as `self`.
        let _ = self.finished_tx.send(finished);
    }

    fn claim_now(&self) -> Option<Job> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(self.lock_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(600));
        let mut inner = self.inner.lock();
        let mut exhausted = Vec::new();
        let mut claimed = None;
        for job in inner.live.values_mut() {
            let expired = job.lease_expired(now);
            if expired {
                tracing::warn!(
                    job_id = %job.id,
                    kind = %job.kind(),
                    collection = %job.collection(),
                    attempt = job.attempts,
                    "job lease expired"
                );
            }
            if !(job.state == JobState::Queued || expired) {
                continue;
            }
            if !job.has_attempts_left() {
                job.state = JobState::Failed;
                job.lock_until = None;
                let error = job
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "lease expired".to_string());
                job.last_error = Some(format!("{error} after {} attempts", job.attempts));
                exhausted.push(job.id);
                continue;
            }
            job.state = JobState::Locked;
            job.attempts += 1;
            job.lock_until = Some(now + lease);
            if expired {
                job.last_error = Some("lease expired".to_string());
            }
            claimed = Some(job.clone());
            break;
        }
        let exhausted: Vec<JobStatus> = exhausted.into_iter().filter_map(|id| inner.retire(id)).collect();
        drop(inner);

        for status in &exhausted {
            tracing::error!(job_id = %status.id, kind = %status.kind, attempts = status.attempts, "job exhausted its attempts");
            metrics::counter!("frl_jobs_failed_total", "terminal" => "true").increment(1);
            self.publish(
                status,
                JobOutcome::Failed {
                    error: status.last_error.clone().unwrap_or_default(),
                    attempts: status.attempts,
                    cause: FailureCause::Infrastructure,
                },
            );
        }
        if let Some(job) = &claimed {
            tracing::debug!(job_id = %job.id, kind = %job.kind(), attempt = job.attempts, "job claimed");
            metrics::counter!("frl_jobs_claimed_total").increment(1);
        }
        claimed
    }
}

impl std::fmt::Debug for InMemoryJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryJobQueue")
            .field("pending", &self.pending())
            .field("lock_duration", &self.lock_duration)
            .finish()
    }
}

#[async_trait::async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, payload: JobPayload, max_attempts: u32) -> Result<JobId, QueueError> {
        let job = Job::new(payload, max_attempts);
        let id = job.id;
        tracing::debug!(job_id = %id, kind = %job.kind(), collection = %job.collection(), "job enqueued");
        {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.seqs.insert(id, seq);
            inner.live.insert(seq, job);
        }
        self.available.notify_one();
        Ok(id)
    }

    async fn claim(&self) -> Result<Job, QueueError> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(job) = self.claim_now() {
                return Ok(job);
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn try_claim(&self) -> Result<Option<Job>, QueueError> {
        Ok(self.claim_now())
    }

    async fn complete(&self, id: JobId, artifact: ProofArtifact) -> Result<Ack, QueueError> {
        let status = {
            let mut inner = self.inner.lock();
            let Some(job) = inner.live_mut(id)? else {
                tracing::info!(job_id = %id, "duplicate completion discarded");
                return Ok(Ack::Duplicate);
            };
            job.state = JobState::Completed;
            job.lock_until = None;
            inner.retire(id).ok_or(QueueError::UnknownJob(id))?
        };
        metrics::counter!("frl_jobs_completed_total").increment(1);
        self.publish(&status, JobOutcome::Completed(artifact));
        Ok(Ack::Applied)
    }

    async fn fail(&self, id: JobId, error: &str, retryable: bool) -> Result<Ack, QueueError> {
        let (status, terminal) = {
            let mut inner = self.inner.lock();
            let Some(job) = inner.live_mut(id)? else {
                return Ok(Ack::Duplicate);
            };
            job.last_error = Some(error.to_string());
            job.lock_until = None;
            let terminal = !retryable || !job.has_attempts_left();
            if terminal {
                job.state = JobState::Failed;
                (inner.retire(id).ok_or(QueueError::UnknownJob(id))?, true)
            } else {
                job.state = JobState::Queued;
                (job.status(), false)
            }
        };
        metrics::counter!("frl_jobs_failed_total", "terminal" => if terminal { "true" } else { "false" })
            .increment(1);
        if terminal {
            let cause = FailureCause::from_retryable(retryable);
            tracing::warn!(
                job_id = %id,
                kind = %status.kind,
                attempts = status.attempts,
                cause = cause.as_str(),
                error,
                "job failed terminally"
            );
            self.publish(
                &status,
                JobOutcome::Failed {
                    error: error.to_string(),
                    attempts: status.attempts,
                    cause,
                },
            );
        } else {
            tracing::info!(job_id = %id, kind = %status.kind, attempt = status.attempts, error, "job requeued after failure");
            self.available.notify_one();
        }
        Ok(Ack::Applied)
    }

    async fn next_finished(&self) -> Result<FinishedJob, QueueError> {
        self.finished_rx.lock().await.recv().await.ok_or(QueueError::Closed)
    }

    async fn get(&self, id: JobId) -> Result<Option<JobStatus>, QueueError> {
        let inner = self.inner.lock();
        let live = inner.seqs.get(&id).and_then(|seq| inner.live.get(seq)).map(Job::status);
        Ok(live.or_else(|| inner.finished.get(&id).cloned()))
    }
}
