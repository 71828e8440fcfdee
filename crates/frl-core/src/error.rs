//! # Error Taxonomy
//!
//! Four classes of failure flow through the pipeline, and each has a fixed
//! handling rule:
//!
//! | Class | Raised by | Handling |
//! |-------|-----------|----------|
//! | `SemanticConflict` | Transition Builder, map store | reject to submitter, never retried |
//! | `ProvingFailure` | proving backend on a prove job | terminal for the job, submitter rebuilds |
//! | `TransientInfra` | queue, database, worker crash | retried via lease reclaim up to a bound |
//! | `DivergenceDetected` | replay / settlement check | collection halted until regenerated |
//!
//! Only `TransientInfra` reports `is_retryable() == true`.

use thiserror::Error;

use crate::digest::Hash;
use crate::identity::Collection;

/// Top-level error type for the proof pipeline.
#[derive(Error, Debug)]
pub enum FrlError {
    /// The mutation contradicts current state; rejected before proving.
    #[error("semantic conflict: {0}")]
    SemanticConflict(#[from] ConflictError),

    /// The proving backend rejected the transition against its own recomputation.
    #[error("proving failure: {0}")]
    ProvingFailure(String),

    /// Broker, database or worker infrastructure failed.
    #[error("transient infrastructure failure: {0}")]
    TransientInfra(String),

    /// In-memory roots disagree with durable replay or the settled root.
    #[error("divergence detected in {collection}: expected root {expected}, found {actual}")]
    DivergenceDetected {
        /// The affected collection.
        collection: Collection,
        /// The root the authoritative source says we should have.
        expected: Hash,
        /// The root we actually hold.
        actual: Hash,
    },

    /// Canonicalization failed.
    #[error("canonicalization error: {0}")]
    Canonicalization(#[from] CanonicalizationError),

    /// A cryptographic primitive failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// An identifier failed validation.
    #[error("identifier error: {0}")]
    Identifier(#[from] IdentifierError),
}

impl FrlError {
    /// Whether the failure may succeed if the same work is attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientInfra(_))
    }
}

/// A mutation that contradicts the current state of a collection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    /// `(author, content_id)` already exists in the collection.
    #[error("content {content_id} by {author} already exists")]
    DuplicateContent {
        /// Author address.
        author: String,
        /// Content identifier.
        content_id: String,
    },

    /// Delete or restore targeted a record that does not exist.
    #[error("content {content_id} by {author} not found")]
    ContentNotFound {
        /// Author address.
        author: String,
        /// Content identifier.
        content_id: String,
    },

    /// The flag history does not permit this transition.
    #[error("cannot apply {kind} to record with is_deleted={is_deleted}, is_restored={is_restored}")]
    InvalidFlagTransition {
        /// The attempted transition kind.
        kind: String,
        /// Current deleted flag.
        is_deleted: bool,
        /// Current restored flag.
        is_restored: bool,
    },

    /// Delete or restore tried to change the record's payload.
    #[error("payload of {content_id} by {author} cannot change")]
    ImmutableBody {
        /// Author address.
        author: String,
        /// Content identifier.
        content_id: String,
    },

    /// The author's sequence number is not the successor of their counter.
    #[error("author sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch {
        /// The only acceptable next sequence number.
        expected: u64,
        /// The number carried by the request.
        actual: u64,
    },

    /// The transition was built against a root the store no longer holds.
    #[error("stale root: transition expects {expected}, store holds {actual}")]
    StaleRoot {
        /// Root the transition was built against.
        expected: Hash,
        /// Root currently held.
        actual: Hash,
    },

    /// The author signature does not verify against the payload.
    #[error("invalid author signature: {0}")]
    InvalidSignature(String),

    /// The record or request belongs to a different collection.
    #[error("collection mismatch: expected {expected}, got {actual}")]
    CollectionMismatch {
        /// Collection handling the request.
        expected: Collection,
        /// Collection named by the payload.
        actual: Collection,
    },
}

/// Error during canonical serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// Float values are not permitted in canonical payloads.
    #[error("float values are not permitted in canonical payloads: {0}")]
    FloatRejected(f64),

    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Error in cryptographic operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Signature verification failed.
    #[error("signature verification failed: {0}")]
    VerificationFailed(String),

    /// Key parsing failed.
    #[error("key error: {0}")]
    KeyError(String),

    /// Digest parsing or computation failed.
    #[error("digest error: {0}")]
    DigestError(String),
}

/// Identifier validation failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// Not a 64-character hex Ed25519 public key.
    #[error("invalid author address: {0:?}")]
    InvalidAuthorAddress(String),

    /// Empty, too long, or containing disallowed characters.
    #[error("invalid content id: {0:?}")]
    InvalidContentId(String),

    /// Not one of posts, comments, reactions, reposts.
    #[error("unknown collection: {0:?}")]
    UnknownCollection(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_infra_is_retryable() {
        assert!(FrlError::TransientInfra("broker down".into()).is_retryable());
        assert!(!FrlError::ProvingFailure("bad root".into()).is_retryable());
        assert!(!FrlError::from(ConflictError::SequenceMismatch { expected: 2, actual: 5 })
            .is_retryable());
        assert!(!FrlError::DivergenceDetected {
            collection: Collection::Posts,
            expected: Hash::ZERO,
            actual: Hash::from_u64(1),
        }
        .is_retryable());
    }

    #[test]
    fn conflict_messages_carry_context() {
        let e = ConflictError::InvalidFlagTransition {
            kind: "delete".into(),
            is_deleted: true,
            is_restored: false,
        };
        let msg = e.to_string();
        assert!(msg.contains("delete"));
        assert!(msg.contains("is_deleted=true"));
    }
}
