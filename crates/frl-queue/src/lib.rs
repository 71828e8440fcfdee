//! # frl-queue — Prove and Merge Jobs
//!
//! [`JobQueue`] is the broker seam: the coordinator enqueues, workers claim
//! and report, and the coordinator drains terminal outcomes. Delivery is at
//! least once; a job whose worker disappears is reclaimed when its lease
//! runs out. [`InMemoryJobQueue`] implements the contract in process; the
//! Postgres implementation lives in `frl-pipeline`.

pub mod job;
pub mod queue;

pub use job::{Ack, FailureCause, FinishedJob, Job, JobKind, JobOutcome, JobPayload, JobState, JobStatus};
pub use queue::{InMemoryJobQueue, JobQueue, QueueError};
