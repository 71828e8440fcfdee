//! # State Regenerator
//!
//! Rebuilds a collection's [`AuthenticatedMapStore`] from durable records.
//! It runs at process start and after a divergence has been detected; no
//! incremental mutation log exists, so full replay is the only recovery path.

use std::sync::Arc;

use frl_core::{Collection, FrlError};

use crate::record_store::{acceptance_order, RecordStore};
use crate::store::AuthenticatedMapStore;
use crate::transition::MapRoots;

/// Replays durable records into fresh map stores.
#[derive(Clone)]
pub struct StateRegenerator {
    records: Arc<dyn RecordStore>,
}

impl StateRegenerator {
    /// Regenerator reading from `records`.
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Rebuild the full store for `collection`.
    pub async fn rebuild_store(&self, collection: Collection) -> Result<AuthenticatedMapStore, FrlError> {
        let mut rows = self.records.load_all(collection).await?;
        // Backends promise acceptance order; sorting again keeps replay
        // deterministic if one does not.
        rows.sort_by(acceptance_order);
        let count = rows.len();
        let store = AuthenticatedMapStore::rebuild_from(collection, rows)?;
        tracing::info!(
            collection = %collection,
            records = count,
            content_root = %store.root(),
            counter_root = %store.counter_root(),
            "collection regenerated from durable records"
        );
        Ok(store)
    }

    /// Rebuild and return only the roots.
    pub async fn rebuild(&self, collection: Collection) -> Result<MapRoots, FrlError> {
        Ok(self.rebuild_store(collection).await?.roots())
    }
}

impl std::fmt::Debug for StateRegenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRegenerator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{MutationRequest, TransitionBuilder};
    use crate::lifecycle::{ContentFlags, TransitionKind};
    use crate::record::{ContentBody, ContentRecord};
    use crate::record_store::InMemoryRecordStore;
    use frl_core::ContentId;
    use frl_crypto::{empty_root, Ed25519KeyPair};
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Create,
        Delete(usize),
        Restore(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Create),
            1 => (0usize..8).prop_map(Op::Delete),
            1 => (0usize..8).prop_map(Op::Restore),
        ]
    }

    /// Apply `ops` for a handful of authors, skipping those the builder rejects.
    /// Returns the live store and the rows a record store would hold.
    fn drive(ops: &[(u8, Op)]) -> (AuthenticatedMapStore, Vec<ContentRecord>) {
        let keys: Vec<Ed25519KeyPair> = (1..=3u8).map(|s| Ed25519KeyPair::from_seed(&[s; 32])).collect();
        let mut store = AuthenticatedMapStore::new(Collection::Posts);
        let mut created: Vec<ContentRecord> = Vec::new();
        let mut height = 0u64;
        for (i, (who, op)) in ops.iter().enumerate() {
            let key = &keys[(*who as usize) % keys.len()];
            let seq = store.counter(&key.address()) + 1;
            height += 1;
            let request = match op {
                Op::Create => MutationRequest {
                    kind: TransitionKind::Create,
                    record: ContentRecord::sign(
                        key,
                        ContentId::new(format!("c{i}")).unwrap(),
                        ContentBody::Post { blob_cid: format!("b{i}") },
                        seq,
                        height,
                        ContentFlags::LIVE,
                    )
                    .unwrap(),
                },
                Op::Delete(n) | Op::Restore(n) => {
                    let Some(target) = created.get(*n) else { continue };
                    let Some(current) = store.record(&target.author, &target.content_id) else { continue };
                    let (kind, flags) = match op {
                        Op::Delete(_) => (TransitionKind::Delete, ContentFlags::DELETED),
                        _ => (TransitionKind::Restore, ContentFlags::RESTORED),
                    };
                    let owner = keys.iter().find(|k| k.address() == current.author).unwrap();
                    let seq = store.counter(&owner.address()) + 1;
                    MutationRequest {
                        kind,
                        record: current.resign(owner, seq, height, flags).unwrap(),
                    }
                }
            };
            if let Ok(t) = TransitionBuilder::build(&store, i as u64, &request) {
                store.apply(&t).unwrap();
                if request.kind == TransitionKind::Create {
                    created.push(request.record.clone());
                }
            }
        }
        let rows = store.records().cloned().collect();
        (store, rows)
    }

    #[tokio::test]
    async fn empty_collection_rebuilds_to_empty_roots() {
        let regen = StateRegenerator::new(Arc::new(InMemoryRecordStore::new()));
        let roots = regen.rebuild(Collection::Comments).await.unwrap();
        assert_eq!(roots.content, empty_root());
        assert_eq!(roots.counter, empty_root());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn replay_of_durable_rows_matches_live_roots(
            ops in proptest::collection::vec((0u8..3, op()), 1..14)
        ) {
            let (live, rows) = drive(&ops);
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (first, second) = rt.block_on(async {
                let records = Arc::new(InMemoryRecordStore::new());
                for row in &rows {
                    records.upsert(row).await.unwrap();
                }
                let regen = StateRegenerator::new(records);
                let first = regen.rebuild(Collection::Posts).await.unwrap();
                let second = regen.rebuild(Collection::Posts).await.unwrap();
                (first, second)
            });
            prop_assert_eq!(first, live.roots());
            prop_assert_eq!(first, second);
        }
    }
}
