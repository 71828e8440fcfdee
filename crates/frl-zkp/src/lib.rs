//! # frl-zkp — Proving Backend
//!
//! The pipeline treats proof generation as a black box with three
//! operations, defined by [`ProvingBackend`]:
//!
//! - `compile()`: one-time circuit load, done when a worker pool warms up;
//! - `prove(descriptor)`: attest one transition;
//! - `merge(left, right)`: fold two chained proofs into one.
//!
//! [`ProofStatement`] is the public claim every artifact carries. Merging
//! is strictly left to right: `left` must end at the index and roots where
//! `right` begins.
//!
//! ## Backends
//!
//! - `mock` (default feature): [`MockProvingBackend`], a transparent
//!   SHA-256 backend that recomputes every root itself.

pub mod artifact;
#[cfg(feature = "mock")]
pub mod mock;
pub mod traits;

pub use artifact::{ProofArtifact, ProofStatement};
#[cfg(feature = "mock")]
pub use mock::MockProvingBackend;
pub use traits::{ProofError, ProvingBackend};
