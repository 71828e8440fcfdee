//! # frl-cli — Feedroll Operator CLI
//!
//! ## Subcommands
//!
//! - `worker`: warm a proving backend and run a worker pool against the
//!   Postgres job queue until interrupted
//! - `rebuild`: replay a collection's durable records and print its roots
//! - `keygen`: generate an Ed25519 author key
//!
//! ## Crate Policy
//!
//! - Argument parsing is separated from the handlers.
//! - Handlers delegate to the domain crates; no pipeline logic lives here.

pub mod keygen;
pub mod rebuild;
pub mod worker;
