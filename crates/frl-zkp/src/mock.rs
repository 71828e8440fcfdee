//! # Mock Proving Backend
//!
//! A deterministic, transparent stand-in for a real proof system. It does
//! every check a circuit would (signature, witnesses against both initial
//! roots, both claimed latest roots, sequence number, flag lifecycle) in
//! plain Rust, and emits SHA-256 digests as "proofs".
//!
//! ## Security Notice
//!
//! The proofs are not succinct and not zero-knowledge. Anyone can forge one.
//! This backend exists so the pipeline can be run and tested end to end.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use frl_core::{tagged_hash, Hash};
use frl_state::{content_key, counter_key, counter_value, TransitionDescriptor};

use crate::artifact::{ProofArtifact, ProofStatement};
use crate::traits::{ProofError, ProvingBackend};

const LEAF_PROOF_TAG: &[u8] = b"frl/proof/mock/leaf";
const MERGE_PROOF_TAG: &[u8] = b"frl/proof/mock/merge";

/// Deterministic SHA-256 proving backend.
#[derive(Debug, Default)]
pub struct MockProvingBackend {
    compiled: AtomicBool,
    prove_delay: Duration,
    merge_delay: Duration,
    merge_faults: AtomicU32,
}

impl MockProvingBackend {
    /// A backend that answers immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `prove`, to stand in for real latency.
    pub fn with_prove_delay(mut self, delay: Duration) -> Self {
        self.prove_delay = delay;
        self
    }

    /// Sleep this long inside every `merge`.
    pub fn with_merge_delay(mut self, delay: Duration) -> Self {
        self.merge_delay = delay;
        self
    }

    /// Make the next `count` merges fail with `Resource`.
    pub fn inject_merge_faults(&self, count: u32) {
        self.merge_faults.store(count, Ordering::SeqCst);
    }

    fn ensure_compiled(&self) -> Result<(), ProofError> {
        if self.compiled.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ProofError::NotCompiled)
        }
    }

    fn take_merge_fault(&self) -> bool {
        self.merge_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn invalid(msg: impl Into<String>) -> ProofError {
    ProofError::InvalidTransition(msg.into())
}

fn statement_digest(statement: &ProofStatement) -> Result<Hash, ProofError> {
    statement
        .digest()
        .map_err(|e| invalid(format!("statement not canonicalizable: {e}")))
}

/// Recompute everything `t` claims. Shared by `prove` and by tests that
/// want to check a descriptor without a backend instance.
pub fn check_transition(t: &TransitionDescriptor) -> Result<(), ProofError> {
    let after = &t.record_after;
    if after.collection() != t.collection {
        return Err(invalid(format!(
            "record belongs to {}, transition to {}",
            after.collection(),
            t.collection
        )));
    }
    after
        .verify_signature()
        .map_err(|e| invalid(format!("author signature: {e}")))?;

    // Content map.
    let key = content_key(&after.author, &after.content_id);
    if t.content_witness.key != key {
        return Err(invalid("content witness is for another key"));
    }
    let before_digest = match &t.record_before {
        Some(before) => {
            if before.author != after.author || before.content_id != after.content_id {
                return Err(invalid("record_before and record_after differ in identity"));
            }
            if before.body != after.body {
                return Err(invalid("payload changed"));
            }
            Some(before.digest().map_err(|e| invalid(e.to_string()))?)
        }
        None => None,
    };
    if t.content_witness.value != before_digest {
        return Err(invalid("content witness value does not match record_before"));
    }
    let initial_content = t
        .content_witness
        .compute_root(before_digest.as_ref())
        .map_err(|e| invalid(e.to_string()))?;
    if initial_content != t.initial_content_root {
        return Err(invalid(format!(
            "content witness yields {initial_content}, descriptor claims initial {}",
            t.initial_content_root
        )));
    }
    let after_digest = after.digest().map_err(|e| invalid(e.to_string()))?;
    let latest_content = t
        .content_witness
        .compute_root(Some(&after_digest))
        .map_err(|e| invalid(e.to_string()))?;
    if latest_content != t.latest_content_root {
        return Err(invalid(format!(
            "update yields content root {latest_content}, descriptor claims {}",
            t.latest_content_root
        )));
    }

    // Counter map.
    if t.counter_witness.key != counter_key(&after.author) {
        return Err(invalid("counter witness is for another key"));
    }
    let previous = match t.counter_witness.value {
        Some(v) => v
            .to_u64()
            .ok_or_else(|| invalid("counter value out of range"))?,
        None => 0,
    };
    if after.author_sequence_number != previous + 1 {
        return Err(invalid(format!(
            "sequence {} does not follow counter {previous}",
            after.author_sequence_number
        )));
    }
    let initial_counter = t
        .counter_witness
        .compute_root(t.counter_witness.value.as_ref())
        .map_err(|e| invalid(e.to_string()))?;
    if initial_counter != t.initial_counter_root {
        return Err(invalid("counter witness does not match initial counter root"));
    }
    let latest_counter = t
        .counter_witness
        .compute_root(Some(&counter_value(after.author_sequence_number)))
        .map_err(|e| invalid(e.to_string()))?;
    if latest_counter != t.latest_counter_root {
        return Err(invalid("update does not yield claimed counter root"));
    }

    // Lifecycle.
    let expected = t
        .kind
        .next_flags(t.record_before.as_ref().map(|r| r.flags))
        .map_err(|e| invalid(e.to_string()))?;
    if expected != after.flags {
        return Err(invalid(format!("{} must produce {expected:?}", t.kind)));
    }
    Ok(())
}

impl ProvingBackend for MockProvingBackend {
    fn compile(&self) -> Result<(), ProofError> {
        if !self.compiled.swap(true, Ordering::AcqRel) {
            tracing::info!("mock proving circuits compiled");
        }
        Ok(())
    }

    fn is_compiled(&self) -> bool {
        self.compiled.load(Ordering::Acquire)
    }

    fn prove(&self, transition: &TransitionDescriptor) -> Result<ProofArtifact, ProofError> {
        self.ensure_compiled()?;
        if !self.prove_delay.is_zero() {
            std::thread::sleep(self.prove_delay);
        }
        check_transition(transition)?;
        let statement = ProofStatement::for_transition(transition);
        let proof = tagged_hash(LEAF_PROOF_TAG, &[statement_digest(&statement)?.as_bytes()]);
        Ok(ProofArtifact {
            statement,
            proof: proof.as_bytes().to_vec(),
        })
    }

    fn merge(&self, left: &ProofArtifact, right: &ProofArtifact) -> Result<ProofArtifact, ProofError> {
        self.ensure_compiled()?;
        if !self.merge_delay.is_zero() {
            std::thread::sleep(self.merge_delay);
        }
        let statement = left.statement.compose(&right.statement)?;
        if self.take_merge_fault() {
            return Err(ProofError::Resource("injected merge fault".to_string()));
        }
        let proof = tagged_hash(
            MERGE_PROOF_TAG,
            &[
                statement_digest(&statement)?.as_bytes(),
                &left.proof,
                &right.proof,
            ],
        );
        Ok(ProofArtifact {
            statement,
            proof: proof.as_bytes().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frl_core::{Collection, ContentId};
    use frl_crypto::Ed25519KeyPair;
    use frl_state::{
        AuthenticatedMapStore, ContentBody, ContentFlags, ContentRecord, MutationRequest,
        TransitionBuilder, TransitionKind,
    };

    fn backend() -> MockProvingBackend {
        let b = MockProvingBackend::new();
        b.compile().unwrap();
        b
    }

    /// Three chained post transitions by one author.
    fn chain() -> Vec<TransitionDescriptor> {
        let key = Ed25519KeyPair::from_seed(&[21u8; 32]);
        let mut store = AuthenticatedMapStore::new(Collection::Posts);
        (1..=3u64)
            .map(|seq| {
                let req = MutationRequest {
                    kind: TransitionKind::Create,
                    record: ContentRecord::sign(
                        &key,
                        ContentId::new(format!("c{seq}")).unwrap(),
                        ContentBody::Post { blob_cid: format!("b{seq}") },
                        seq,
                        seq,
                        ContentFlags::LIVE,
                    )
                    .unwrap(),
                };
                let t = TransitionBuilder::build(&store, seq - 1, &req).unwrap();
                store.apply(&t).unwrap();
                t
            })
            .collect()
    }

    #[test]
    fn prove_requires_compile() {
        let t = chain().remove(0);
        assert_eq!(MockProvingBackend::new().prove(&t), Err(ProofError::NotCompiled));
    }

    #[test]
    fn valid_transition_proves_deterministically() {
        let b = backend();
        let t = chain().remove(0);
        let p1 = b.prove(&t).unwrap();
        let p2 = b.prove(&t).unwrap();
        assert_eq!(p1, p2);
        assert_eq!(p1.statement.initial, t.initial_roots());
        assert_eq!(p1.statement.latest, t.latest_roots());
    }

    #[test]
    fn forged_latest_root_is_invalid() {
        let b = backend();
        let mut t = chain().remove(0);
        t.latest_content_root = Hash::from_u64(9);
        assert!(matches!(b.prove(&t), Err(ProofError::InvalidTransition(_))));
    }

    #[test]
    fn forged_initial_root_is_invalid() {
        let b = backend();
        let mut t = chain().remove(1);
        t.initial_content_root = Hash::from_u64(9);
        assert!(matches!(b.prove(&t), Err(ProofError::InvalidTransition(_))));
    }

    #[test]
    fn skipped_sequence_is_invalid() {
        let b = backend();
        let chain = chain();
        let mut t = chain[1].clone();
        t.counter_witness = chain[0].counter_witness.clone();
        assert!(matches!(b.prove(&t), Err(ProofError::InvalidTransition(_))));
    }

    #[test]
    fn merge_is_associative_in_chained_direction() {
        let b = backend();
        let proofs: Vec<ProofArtifact> = chain().iter().map(|t| b.prove(t).unwrap()).collect();
        let left = b.merge(&b.merge(&proofs[0], &proofs[1]).unwrap(), &proofs[2]).unwrap();
        let right = b.merge(&proofs[0], &b.merge(&proofs[1], &proofs[2]).unwrap()).unwrap();
        assert_eq!(left.statement, right.statement);
        assert_eq!(left.statement.first, 0);
        assert_eq!(left.statement.last, 2);
        assert_eq!(left.statement.initial, proofs[0].statement.initial);
        assert_eq!(left.statement.latest, proofs[2].statement.latest);
    }

    #[test]
    fn merge_out_of_order_is_non_adjacent() {
        let b = backend();
        let proofs: Vec<ProofArtifact> = chain().iter().map(|t| b.prove(t).unwrap()).collect();
        assert!(matches!(
            b.merge(&proofs[1], &proofs[0]),
            Err(ProofError::NonAdjacent(_))
        ));
        assert!(matches!(
            b.merge(&proofs[0], &proofs[2]),
            Err(ProofError::NonAdjacent(_))
        ));
    }

    #[test]
    fn injected_merge_fault_is_retryable_once() {
        let b = backend();
        let proofs: Vec<ProofArtifact> = chain().iter().map(|t| b.prove(t).unwrap()).collect();
        b.inject_merge_faults(1);
        let err = b.merge(&proofs[0], &proofs[1]).unwrap_err();
        assert!(err.is_retryable());
        assert!(b.merge(&proofs[0], &proofs[1]).is_ok());
    }
}
