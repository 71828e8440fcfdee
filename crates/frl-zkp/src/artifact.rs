//! # Proof Artifacts
//!
//! A [`ProofArtifact`] pairs an opaque proof with the [`ProofStatement`] it
//! attests: which collection, which contiguous range of transitions, and
//! the roots at both ends. Two artifacts compose only left to right, when
//! the left one ends exactly where the right one begins.

use frl_core::{canonical_digest, CanonicalBytes, CanonicalizationError, Collection, Hash};
use frl_state::{MapRoots, TransitionDescriptor};
use serde::{Deserialize, Serialize};

use crate::traits::ProofError;

const STATEMENT_TAG: &[u8] = b"frl/proof/statement";

/// Public claim of a proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProofStatement {
    /// Collection the covered transitions mutate.
    pub collection: Collection,
    /// Index of the first covered transition.
    pub first: u64,
    /// Index of the last covered transition (inclusive).
    pub last: u64,
    /// Roots before the first transition.
    pub initial: MapRoots,
    /// Roots after the last transition.
    pub latest: MapRoots,
}

impl ProofStatement {
    /// Statement of a single transition.
    pub fn for_transition(t: &TransitionDescriptor) -> Self {
        Self {
            collection: t.collection,
            first: t.index,
            last: t.index,
            initial: t.initial_roots(),
            latest: t.latest_roots(),
        }
    }

    /// Number of transitions covered.
    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }

    /// Always false; a statement covers at least one transition.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `next` continues this statement with nothing in between.
    pub fn composes_with(&self, next: &ProofStatement) -> bool {
        self.collection == next.collection
            && self.last.checked_add(1) == Some(next.first)
            && self.latest == next.initial
    }

    /// Statement covering `self` followed by `next`.
    pub fn compose(&self, next: &ProofStatement) -> Result<ProofStatement, ProofError> {
        if !self.composes_with(next) {
            return Err(ProofError::NonAdjacent(format!(
                "{} [{}..={}] ends at {}, {} [{}..={}] starts at {}",
                self.collection,
                self.first,
                self.last,
                self.latest,
                next.collection,
                next.first,
                next.last,
                next.initial
            )));
        }
        Ok(ProofStatement {
            collection: self.collection,
            first: self.first,
            last: next.last,
            initial: self.initial,
            latest: next.latest,
        })
    }

    /// Tagged digest of the canonical statement.
    pub fn digest(&self) -> Result<Hash, CanonicalizationError> {
        Ok(canonical_digest(STATEMENT_TAG, &CanonicalBytes::new(self)?))
    }
}

/// A proof and the statement it attests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofArtifact {
    /// What is proven.
    pub statement: ProofStatement,
    /// Backend-specific proof bytes, opaque to the pipeline.
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
}

impl ProofArtifact {
    /// Shorthand for `self.statement.composes_with(&next.statement)`.
    pub fn composes_with(&self, next: &ProofArtifact) -> bool {
        self.statement.composes_with(&next.statement)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        serializer.serialize_str(&hex)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let hex = String::deserialize(deserializer)?;
        if hex.len() % 2 != 0 || !hex.is_ascii() {
            return Err(serde::de::Error::custom("proof hex must be ascii with even length"));
        }
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(serde::de::Error::custom))
            .collect()
    }
}
