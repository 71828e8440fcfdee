//! # Proving Backend Trait
//!
//! The only capability the pipeline needs from a proof system: a one-time
//! `compile`, a `prove` per transition and a `merge` of two chained proofs.
//! Implementations are `Send + Sync` so one warmed instance can serve every
//! worker in a pool.
//!
//! ## Failure semantics
//!
//! - `InvalidTransition`: the descriptor does not hold up against the
//!   backend's own recomputation. Retrying the same input cannot succeed.
//! - `NonAdjacent`: the two proofs handed to `merge` do not chain.
//! - `Resource`: the backend ran out of something (memory, GPU, time).
//!   The same input may succeed later.

use frl_state::TransitionDescriptor;
use thiserror::Error;

use crate::artifact::ProofArtifact;

/// Error from a proving backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    /// `prove` or `merge` was called before `compile`.
    #[error("proving circuits not compiled")]
    NotCompiled,
    /// The transition does not match the backend's recomputation.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    /// The merge inputs do not chain.
    #[error("proofs are not adjacent: {0}")]
    NonAdjacent(String),
    /// Transient resource exhaustion.
    #[error("prover resource exhausted: {0}")]
    Resource(String),
}

impl ProofError {
    /// Whether the same input may succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Resource(_))
    }
}

/// A proof system able to prove single transitions and fold chained proofs.
pub trait ProvingBackend: Send + Sync {
    /// Load or compile circuits. Expensive; call once per process.
    fn compile(&self) -> Result<(), ProofError>;

    /// Whether `compile` has completed.
    fn is_compiled(&self) -> bool;

    /// Prove a single transition.
    fn prove(&self, transition: &TransitionDescriptor) -> Result<ProofArtifact, ProofError>;

    /// Fold `left` followed by `right` into one proof.
    fn merge(&self, left: &ProofArtifact, right: &ProofArtifact) -> Result<ProofArtifact, ProofError>;
}
