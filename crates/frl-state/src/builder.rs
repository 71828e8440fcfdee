//! # Transition Builder
//!
//! Turns a signed mutation request into a [`TransitionDescriptor`] against a
//! snapshot of an [`AuthenticatedMapStore`]. Building never mutates the
//! store; the caller applies the descriptor once its proof is in.
//!
//! Checks, in order:
//!
//! 1. the record belongs to the store's collection;
//! 2. the author signature verifies;
//! 3. existence matches the kind (no duplicate create, no delete or restore
//!    of a missing record) and delete/restore keep the payload;
//! 4. the flag history permits the kind;
//! 5. the sequence number is the author's counter plus one.
//!
//! The caller must hold the collection's critical section from `build`
//! until the descriptor is enqueued and staged.

use frl_core::{ConflictError, FrlError};
use serde::{Deserialize, Serialize};

use crate::lifecycle::TransitionKind;
use crate::record::{counter_value, ContentRecord};
use crate::store::AuthenticatedMapStore;
use crate::transition::TransitionDescriptor;

/// A signed mutation as received from ingress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRequest {
    /// What the mutation does.
    pub kind: TransitionKind,
    /// The record as it should read afterwards, signed by its author.
    pub record: ContentRecord,
}

/// Stateless builder; see the module docs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionBuilder;

impl TransitionBuilder {
    /// Validate `request` against `store` and describe the resulting transition.
    pub fn build(
        store: &AuthenticatedMapStore,
        index: u64,
        request: &MutationRequest,
    ) -> Result<TransitionDescriptor, FrlError> {
        let record = &request.record;
        if record.collection() != store.collection() {
            return Err(ConflictError::CollectionMismatch {
                expected: store.collection(),
                actual: record.collection(),
            }
            .into());
        }

        record
            .verify_signature()
            .map_err(|e| ConflictError::InvalidSignature(e.to_string()))?;

        let before = store.record(&record.author, &record.content_id).cloned();
        match (request.kind, &before) {
            (TransitionKind::Create, Some(_)) => {
                return Err(ConflictError::DuplicateContent {
                    author: record.author.to_string(),
                    content_id: record.content_id.to_string(),
                }
                .into());
            }
            (TransitionKind::Delete | TransitionKind::Restore, None) => {
                return Err(ConflictError::ContentNotFound {
                    author: record.author.to_string(),
                    content_id: record.content_id.to_string(),
                }
                .into());
            }
            (TransitionKind::Delete | TransitionKind::Restore, Some(prev)) if prev.body != record.body => {
                return Err(ConflictError::ImmutableBody {
                    author: record.author.to_string(),
                    content_id: record.content_id.to_string(),
                }
                .into());
            }
            _ => {}
        }

        let next = request.kind.next_flags(before.as_ref().map(|r| r.flags))?;
        if next != record.flags {
            // The request signs flags the lifecycle would not produce.
            let shown = before.as_ref().map(|r| r.flags).unwrap_or_default();
            return Err(ConflictError::InvalidFlagTransition {
                kind: request.kind.name().to_string(),
                is_deleted: shown.is_deleted,
                is_restored: shown.is_restored,
            }
            .into());
        }

        let expected_seq = store.counter(&record.author) + 1;
        if record.author_sequence_number != expected_seq {
            return Err(ConflictError::SequenceMismatch {
                expected: expected_seq,
                actual: record.author_sequence_number,
            }
            .into());
        }

        let initial = store.roots();
        let content_witness = store.content_witness(&record.author, &record.content_id);
        let counter_witness = store.counter_witness(&record.author);
        let latest_content_root = content_witness.compute_root(Some(&record.digest()?))?;
        let latest_counter_root =
            counter_witness.compute_root(Some(&counter_value(record.author_sequence_number)))?;

        Ok(TransitionDescriptor {
            collection: store.collection(),
            index,
            kind: request.kind,
            initial_counter_root: initial.counter,
            latest_counter_root,
            initial_content_root: initial.content,
            latest_content_root,
            record_before: before,
            record_after: record.clone(),
            counter_witness,
            content_witness,
        })
    }
}
