//! # Durable Record Store
//!
//! The source of truth for replay. Rows are written only after the map
//! commit for their transition has succeeded, and read back in acceptance
//! order by the [`StateRegenerator`](crate::regenerator::StateRegenerator).

use std::cmp::Ordering;
use std::collections::BTreeMap;

use frl_core::{AuthorAddress, Collection, ContentId, FrlError};
use parking_lot::RwLock;

use crate::record::ContentRecord;

/// Durable storage of accepted content rows.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the row for `(collection, author, content_id)`.
    async fn upsert(&self, record: &ContentRecord) -> Result<(), FrlError>;

    /// Fetch one row.
    async fn get(
        &self,
        collection: Collection,
        author: &AuthorAddress,
        content_id: &ContentId,
    ) -> Result<Option<ContentRecord>, FrlError>;

    /// Every row of a collection, in acceptance order.
    async fn load_all(&self, collection: Collection) -> Result<Vec<ContentRecord>, FrlError>;
}

/// Acceptance order: block height, then sequence number, then author and
/// content id to break ties deterministically.
pub fn acceptance_order(a: &ContentRecord, b: &ContentRecord) -> Ordering {
    a.block_height
        .cmp(&b.block_height)
        .then(a.author_sequence_number.cmp(&b.author_sequence_number))
        .then_with(|| a.author.cmp(&b.author))
        .then_with(|| a.content_id.cmp(&b.content_id))
}

type RowKey = (Collection, AuthorAddress, ContentId);

/// Process-local record store.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    rows: RwLock<BTreeMap<RowKey, ContentRecord>>,
}

impl InMemoryRecordStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows across all collections.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn upsert(&self, record: &ContentRecord) -> Result<(), FrlError> {
        let key = (
            record.collection(),
            record.author.clone(),
            record.content_id.clone(),
        );
        self.rows.write().insert(key, record.clone());
        Ok(())
    }

    async fn get(
        &self,
        collection: Collection,
        author: &AuthorAddress,
        content_id: &ContentId,
    ) -> Result<Option<ContentRecord>, FrlError> {
        let key = (collection, author.clone(), content_id.clone());
        Ok(self.rows.read().get(&key).cloned())
    }

    async fn load_all(&self, collection: Collection) -> Result<Vec<ContentRecord>, FrlError> {
        let mut rows: Vec<ContentRecord> = self
            .rows
            .read()
            .iter()
            .filter(|((c, _, _), _)| *c == collection)
            .map(|(_, r)| r.clone())
            .collect();
        rows.sort_by(acceptance_order);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ContentFlags;
    use crate::record::ContentBody;
    use frl_crypto::Ed25519KeyPair;

    fn post(seed: u8, id: &str, seq: u64, height: u64) -> ContentRecord {
        ContentRecord::sign(
            &Ed25519KeyPair::from_seed(&[seed; 32]),
            ContentId::new(id).unwrap(),
            ContentBody::Post { blob_cid: id.to_string() },
            seq,
            height,
            ContentFlags::LIVE,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn load_all_returns_acceptance_order() {
        let store = InMemoryRecordStore::new();
        store.upsert(&post(1, "late", 2, 20)).await.unwrap();
        store.upsert(&post(1, "early", 1, 10)).await.unwrap();
        store.upsert(&post(2, "same-height", 1, 10)).await.unwrap();
        let rows = store.load_all(Collection::Posts).await.unwrap();
        let heights: Vec<u64> = rows.iter().map(|r| r.block_height).collect();
        assert_eq!(heights, vec![10, 10, 20]);
        assert_eq!(rows[2].content_id.as_str(), "late");
        assert!(store.load_all(Collection::Comments).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_replaces_by_author_and_content_id() {
        let store = InMemoryRecordStore::new();
        let key = Ed25519KeyPair::from_seed(&[3u8; 32]);
        let first = post(3, "c1", 1, 1);
        store.upsert(&first).await.unwrap();
        let deleted = first.resign(&key, 2, 2, ContentFlags::DELETED).unwrap();
        store.upsert(&deleted).await.unwrap();
        assert_eq!(store.len(), 1);
        let got = store
            .get(Collection::Posts, &first.author, &first.content_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.flags, ContentFlags::DELETED);
    }
}
