//! # Jobs
//!
//! A job is either a prove job (one transition) or a merge job (two chained
//! artifacts). Payloads are immutable once enqueued.
//!
//! ```text
//! Queued ──claim──▶ Locked ──complete──▶ Completed
//!   ▲                 │
//!   │                 ├──fail(retryable, attempts left)──▶ Queued
//!   │                 ├──fail(terminal) / attempts exhausted──▶ Failed
//!   └──lease expiry───┘
//! ```
//!
//! A terminal failure carries a [`FailureCause`]: `Rejected` when a worker
//! reported a non-retryable error, `Infrastructure` when retryable errors,
//! crashes or expired leases used up the attempts.

use chrono::{DateTime, Utc};
use frl_core::{Collection, JobId};
use frl_state::TransitionDescriptor;
use frl_zkp::ProofArtifact;
use serde::{Deserialize, Serialize};

/// The two kinds of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Prove one transition.
    Prove,
    /// Merge two chained proofs.
    Merge,
}

impl JobKind {
    /// Lowercase name, as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prove => "prove",
            Self::Merge => "merge",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// A transition to prove.
    Prove {
        /// The transition, with witnesses.
        transition: Box<TransitionDescriptor>,
    },
    /// Two artifacts to fold, `left` first.
    Merge {
        /// Earlier range.
        left: Box<ProofArtifact>,
        /// Later range.
        right: Box<ProofArtifact>,
    },
}

impl JobPayload {
    /// Kind of job this payload makes.
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Prove { .. } => JobKind::Prove,
            Self::Merge { .. } => JobKind::Merge,
        }
    }

    /// Collection the work belongs to.
    pub fn collection(&self) -> Collection {
        match self {
            Self::Prove { transition } => transition.collection,
            Self::Merge { left, .. } => left.statement.collection,
        }
    }
}

/// Lifecycle position of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker.
    Queued,
    /// Held by a worker until `lock_until`.
    Locked,
    /// Finished with an artifact.
    Completed,
    /// Finished without one; will not run again.
    Failed,
}

impl JobState {
    /// Lowercase name, as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Locked => "locked",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the job has reached an end state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "locked" => Ok(Self::Locked),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job state {other:?}")),
        }
    }
}

/// A job as seen by the queue and by the worker that claimed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Identifier.
    pub id: JobId,
    /// Input.
    pub payload: JobPayload,
    /// Number of times the job has been claimed.
    pub attempts: u32,
    /// Claims allowed before the job fails terminally.
    pub max_attempts: u32,
    /// Lease expiry while locked.
    pub lock_until: Option<DateTime<Utc>>,
    /// Lifecycle position.
    pub state: JobState,
    /// Most recent failure message.
    pub last_error: Option<String>,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// A fresh queued job.
    pub fn new(payload: JobPayload, max_attempts: u32) -> Self {
        Self {
            id: JobId::new(),
            payload,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            lock_until: None,
            state: JobState::Queued,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// Kind of job.
    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    /// Collection the job belongs to.
    pub fn collection(&self) -> Collection {
        self.payload.collection()
    }

    /// Whether a held lease has run out at `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Locked && self.lock_until.map_or(true, |until| until <= now)
    }

    /// Whether another claim is allowed.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Everything but the payload.
    pub fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id,
            kind: self.kind(),
            collection: self.collection(),
            state: self.state,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            lock_until: self.lock_until,
            last_error: self.last_error.clone(),
        }
    }
}

/// Payload-free view of a job. Finished jobs are only kept in this form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Identifier.
    pub id: JobId,
    /// Kind of job.
    pub kind: JobKind,
    /// Collection.
    pub collection: Collection,
    /// Lifecycle position.
    pub state: JobState,
    /// Claims made so far.
    pub attempts: u32,
    /// Claims allowed.
    pub max_attempts: u32,
    /// Lease expiry while locked.
    pub lock_until: Option<DateTime<Utc>>,
    /// Most recent failure message.
    pub last_error: Option<String>,
}

/// Why a job failed terminally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The backend refused the input; the same input will never succeed.
    Rejected,
    /// Crashes, expired leases or resource errors used up every attempt.
    Infrastructure,
}

impl FailureCause {
    /// Cause of a failure reported by a worker.
    pub fn from_retryable(retryable: bool) -> Self {
        if retryable {
            Self::Infrastructure
        } else {
            Self::Rejected
        }
    }

    /// Lowercase name, as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Infrastructure => "infrastructure",
        }
    }
}

impl std::str::FromStr for FailureCause {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rejected" => Ok(Self::Rejected),
            "infrastructure" => Ok(Self::Infrastructure),
            other => Err(format!("unknown failure cause {other:?}")),
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The worker returned an artifact.
    Completed(ProofArtifact),
    /// The job failed and will not run again.
    Failed {
        /// Last error reported.
        error: String,
        /// Claims made.
        attempts: u32,
        /// Whether the backend refused the work or the attempts ran out.
        cause: FailureCause,
    },
}

/// A terminal job outcome, delivered once to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedJob {
    /// Identifier.
    pub id: JobId,
    /// Kind of job.
    pub kind: JobKind,
    /// Collection.
    pub collection: Collection,
    /// Result.
    pub outcome: JobOutcome,
}

/// Whether a report changed the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The report was recorded.
    Applied,
    /// The job had already finished; the report was discarded.
    Duplicate,
}
