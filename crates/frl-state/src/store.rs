//! # Authenticated Map Store
//!
//! The content map and the author counter map of one collection, plus the
//! records behind the content map's values.
//!
//! ## Mutation paths
//!
//! - [`AuthenticatedMapStore::apply`] applies a proven transition. It checks
//!   both initial roots, writes the content and counter entries as one unit,
//!   and checks both resulting roots. Any mismatch leaves the store untouched.
//! - [`AuthenticatedMapStore::rebuild_from`] folds durable records into an
//!   empty store. Replay is deterministic and idempotent.
//!
//! There is no other way to change a root.

use std::collections::HashMap;

use frl_core::{AuthorAddress, Collection, ConflictError, ContentId, FrlError, Hash};
use frl_crypto::{MapWitness, SparseMerkleMap};

use crate::record::{content_key, counter_key, counter_value, ContentRecord};
use crate::transition::{MapRoots, TransitionDescriptor};

/// Both authenticated maps of one collection.
#[derive(Debug, Clone)]
pub struct AuthenticatedMapStore {
    collection: Collection,
    content: SparseMerkleMap,
    counters: SparseMerkleMap,
    records: HashMap<(AuthorAddress, ContentId), ContentRecord>,
}

impl AuthenticatedMapStore {
    /// An empty store for `collection`.
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            content: SparseMerkleMap::new(),
            counters: SparseMerkleMap::new(),
            records: HashMap::new(),
        }
    }

    /// Rebuild a store by replaying `records` in the given order.
    ///
    /// Records from another collection are rejected. A record whose
    /// `(author, content_id)` repeats overwrites the earlier one; the
    /// author's counter ends at the highest sequence number seen.
    pub fn rebuild_from<I>(collection: Collection, records: I) -> Result<Self, FrlError>
    where
        I: IntoIterator<Item = ContentRecord>,
    {
        let mut store = Self::new(collection);
        for record in records {
            store.replay(record)?;
        }
        Ok(store)
    }

    /// The collection this store holds.
    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Content map root.
    pub fn root(&self) -> Hash {
        self.content.root()
    }

    /// Counter map root.
    pub fn counter_root(&self) -> Hash {
        self.counters.root()
    }

    /// Both roots.
    pub fn roots(&self) -> MapRoots {
        MapRoots {
            content: self.content.root(),
            counter: self.counters.root(),
        }
    }

    /// Raw content-map lookup.
    pub fn get(&self, key: &Hash) -> Option<Hash> {
        self.content.get(key)
    }

    /// Raw content-map witness.
    pub fn witness(&self, key: &Hash) -> MapWitness {
        self.content.witness(key)
    }

    /// The stored record for `(author, content_id)`.
    pub fn record(&self, author: &AuthorAddress, content_id: &ContentId) -> Option<&ContentRecord> {
        self.records.get(&(author.clone(), content_id.clone()))
    }

    /// All stored records, in no particular order.
    pub fn records(&self) -> impl Iterator<Item = &ContentRecord> {
        self.records.values()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The author's last accepted sequence number, 0 if none.
    pub fn counter(&self, author: &AuthorAddress) -> u64 {
        self.counters
            .get(&counter_key(author))
            .and_then(|v| v.to_u64())
            .unwrap_or(0)
    }

    /// Witness for the record's content key.
    pub fn content_witness(&self, author: &AuthorAddress, content_id: &ContentId) -> MapWitness {
        self.content.witness(&content_key(author, content_id))
    }

    /// Witness for the author's counter key.
    pub fn counter_witness(&self, author: &AuthorAddress) -> MapWitness {
        self.counters.witness(&counter_key(author))
    }

    /// Apply a proven transition.
    ///
    /// Fails with `SemanticConflict(StaleRoot)` if either initial root is not
    /// the current root, and with `DivergenceDetected` if the writes do not
    /// land on the claimed latest roots. The store is unchanged on failure.
    pub fn apply(&mut self, transition: &TransitionDescriptor) -> Result<MapRoots, FrlError> {
        if transition.collection != self.collection {
            return Err(ConflictError::CollectionMismatch {
                expected: self.collection,
                actual: transition.collection,
            }
            .into());
        }
        let current = self.roots();
        if current.content != transition.initial_content_root {
            return Err(ConflictError::StaleRoot {
                expected: transition.initial_content_root,
                actual: current.content,
            }
            .into());
        }
        if current.counter != transition.initial_counter_root {
            return Err(ConflictError::StaleRoot {
                expected: transition.initial_counter_root,
                actual: current.counter,
            }
            .into());
        }

        let record = &transition.record_after;
        let ckey = record.content_key();
        let nkey = counter_key(&record.author);
        let prev_content = self.content.get(&ckey);
        let prev_counter = self.counters.get(&nkey);

        self.content.insert(ckey, record.digest()?);
        self.counters
            .insert(nkey, counter_value(record.author_sequence_number));

        let reached = self.roots();
        if reached != transition.latest_roots() {
            restore(&mut self.content, ckey, prev_content);
            restore(&mut self.counters, nkey, prev_counter);
            let (expected, actual) = if reached.content != transition.latest_content_root {
                (transition.latest_content_root, reached.content)
            } else {
                (transition.latest_counter_root, reached.counter)
            };
            return Err(FrlError::DivergenceDetected {
                collection: self.collection,
                expected,
                actual,
            });
        }

        self.records.insert(
            (record.author.clone(), record.content_id.clone()),
            record.clone(),
        );
        Ok(reached)
    }

    fn replay(&mut self, record: ContentRecord) -> Result<(), FrlError> {
        if record.collection() != self.collection {
            return Err(ConflictError::CollectionMismatch {
                expected: self.collection,
                actual: record.collection(),
            }
            .into());
        }
        self.content.insert(record.content_key(), record.digest()?);
        let seq = record.author_sequence_number.max(self.counter(&record.author));
        self.counters
            .insert(counter_key(&record.author), counter_value(seq));
        self.records
            .insert((record.author.clone(), record.content_id.clone()), record);
        Ok(())
    }
}

fn restore(map: &mut SparseMerkleMap, key: Hash, previous: Option<Hash>) {
    match previous {
        Some(value) => map.insert(key, value),
        None => map.remove(&key),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{MutationRequest, TransitionBuilder};
    use crate::lifecycle::{ContentFlags, TransitionKind};
    use crate::record::ContentBody;
    use frl_crypto::{empty_root, Ed25519KeyPair};

    fn key() -> Ed25519KeyPair {
        Ed25519KeyPair::from_seed(&[11u8; 32])
    }

    fn create(key: &Ed25519KeyPair, id: &str, seq: u64) -> MutationRequest {
        MutationRequest {
            kind: TransitionKind::Create,
            record: ContentRecord::sign(
                key,
                ContentId::new(id).unwrap(),
                ContentBody::Post { blob_cid: format!("blob-{id}") },
                seq,
                seq * 10,
                ContentFlags::LIVE,
            )
            .unwrap(),
        }
    }

    #[test]
    fn new_store_has_empty_roots() {
        let store = AuthenticatedMapStore::new(Collection::Posts);
        assert_eq!(store.root(), empty_root());
        assert_eq!(store.counter_root(), empty_root());
        assert!(store.is_empty());
    }

    #[test]
    fn apply_moves_both_roots() {
        let k = key();
        let mut store = AuthenticatedMapStore::new(Collection::Posts);
        let t = TransitionBuilder::build(&store, 0, &create(&k, "c1", 1)).unwrap();
        let roots = store.apply(&t).unwrap();
        assert_eq!(roots, t.latest_roots());
        assert_eq!(store.counter(&k.address()), 1);
        assert!(store.record(&k.address(), &ContentId::new("c1").unwrap()).is_some());
    }

    #[test]
    fn stale_transition_is_rejected_without_mutation() {
        let k = key();
        let mut store = AuthenticatedMapStore::new(Collection::Posts);
        let t1 = TransitionBuilder::build(&store, 0, &create(&k, "c1", 1)).unwrap();
        let stale = TransitionBuilder::build(&store, 1, &create(&k, "c2", 1)).unwrap();
        store.apply(&t1).unwrap();
        let before = store.roots();
        let err = store.apply(&stale).unwrap_err();
        assert!(matches!(
            err,
            FrlError::SemanticConflict(ConflictError::StaleRoot { .. })
        ));
        assert_eq!(store.roots(), before);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn wrong_latest_root_is_divergence_and_rolls_back() {
        let k = key();
        let mut store = AuthenticatedMapStore::new(Collection::Posts);
        let mut t = TransitionBuilder::build(&store, 0, &create(&k, "c1", 1)).unwrap();
        t.latest_content_root = Hash::from_u64(42);
        let err = store.apply(&t).unwrap_err();
        assert!(matches!(err, FrlError::DivergenceDetected { .. }));
        assert_eq!(store.root(), empty_root());
        assert_eq!(store.counter_root(), empty_root());
        assert!(store.is_empty());
    }

    #[test]
    fn rebuild_matches_sequential_apply() {
        let k = key();
        let mut store = AuthenticatedMapStore::new(Collection::Posts);
        let mut accepted = Vec::new();
        for (i, id) in ["c1", "c2", "c3"].iter().enumerate() {
            let req = create(&k, id, i as u64 + 1);
            let t = TransitionBuilder::build(&store, i as u64, &req).unwrap();
            store.apply(&t).unwrap();
            accepted.push(req.record);
        }
        let rebuilt = AuthenticatedMapStore::rebuild_from(Collection::Posts, accepted.clone()).unwrap();
        assert_eq!(rebuilt.roots(), store.roots());
        let again = AuthenticatedMapStore::rebuild_from(Collection::Posts, accepted).unwrap();
        assert_eq!(again.roots(), rebuilt.roots());
    }

    #[test]
    fn rebuild_rejects_foreign_records() {
        let k = key();
        let record = create(&k, "c1", 1).record;
        let err = AuthenticatedMapStore::rebuild_from(Collection::Comments, vec![record]).unwrap_err();
        assert!(matches!(
            err,
            FrlError::SemanticConflict(ConflictError::CollectionMismatch { .. })
        ));
    }
}
