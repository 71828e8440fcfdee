//! # frl-pipeline — Proof Production
//!
//! The asynchronous half of feedroll: everything between an accepted
//! mutation and a settled aggregate proof.
//!
//! - **Coordinator** (`pipeline.rs`): [`ProofPipeline`] owns one
//!   single-writer state per collection. It stages transitions, commits
//!   them in submission order as their proofs complete, and feeds the
//!   committed proofs to the merge scheduler.
//! - **Merge Scheduler** (`scheduler.rs`): strict left-to-right pairwise
//!   reduction of committed proofs into one aggregate per batch.
//! - **Worker Pool** (`worker.rs`): tokio tasks running prove and merge
//!   jobs on a warmed [`ProvingBackend`](frl_zkp::ProvingBackend).
//! - **Settlement** (`settlement.rs`): the external ledger seam.
//! - **Persistence** (`db/`): Postgres job queue and record store.
//! - **Configuration** (`config.rs`): `FRL_*` environment variables.
//!
//! ## Crate Policy
//!
//! - Map roots change only through `AuthenticatedMapStore::apply`, under
//!   the collection's lock.
//! - No `.unwrap()` outside tests.

pub mod config;
pub mod db;
pub mod pipeline;
pub mod scheduler;
pub mod settlement;
pub mod worker;

pub use config::{ConfigError, PipelineConfig};
pub use db::{init_pool, PgJobQueue, PgRecordStore};
pub use pipeline::{CollectionStatus, CommitReceipt, ProofPipeline, SubmissionReceipt};
pub use scheduler::{MergePair, MergeScheduler};
pub use settlement::{InMemoryLedger, SettlementError, SettlementReceipt, SettlementTarget};
pub use worker::WorkerPool;
