//! # Settlement
//!
//! The external ledger accepts one aggregate proof per collection per batch
//! and only if the proof starts from the roots it settled last. Everything
//! about the ledger beyond that check lives outside this crate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use frl_core::Collection;
use frl_crypto::empty_root;
use frl_state::MapRoots;
use frl_zkp::ProofArtifact;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Settlement failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// The proof does not start where the ledger's last settlement ended.
    #[error("root mismatch for {collection}: ledger holds {settled}, proof starts at {claimed}")]
    RootMismatch {
        /// Collection being settled.
        collection: Collection,
        /// Roots the ledger holds.
        settled: MapRoots,
        /// Initial roots claimed by the proof.
        claimed: MapRoots,
    },
    /// The ledger could not be reached.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Proof of an accepted settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    /// Collection settled.
    pub collection: Collection,
    /// Batch number for this collection, starting at 1.
    pub batch: u64,
    /// Roots before the batch.
    pub previous: MapRoots,
    /// Roots after the batch.
    pub roots: MapRoots,
    /// Transitions covered.
    pub transitions: u64,
    /// Acceptance time.
    pub settled_at: DateTime<Utc>,
}

/// An external ledger that accepts aggregate proofs.
#[async_trait::async_trait]
pub trait SettlementTarget: Send + Sync {
    /// Submit an aggregate proof.
    async fn settle(&self, artifact: &ProofArtifact) -> Result<SettlementReceipt, SettlementError>;

    /// Roots the ledger currently holds for `collection`.
    async fn settled_roots(&self, collection: Collection) -> Result<MapRoots, SettlementError>;
}

/// A ledger kept in process memory. Every collection starts at the empty roots.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    history: Mutex<HashMap<Collection, Vec<SettlementReceipt>>>,
    genesis: Mutex<HashMap<Collection, MapRoots>>,
}

impl InMemoryLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `collection` at `roots` instead of the empty roots.
    pub fn with_genesis(self, collection: Collection, roots: MapRoots) -> Self {
        self.genesis.lock().insert(collection, roots);
        self
    }

    /// Accepted settlements for `collection`, oldest first.
    pub fn history(&self, collection: Collection) -> Vec<SettlementReceipt> {
        self.history
            .lock()
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    fn current(&self, collection: Collection) -> MapRoots {
        if let Some(last) = self.history.lock().get(&collection).and_then(|h| h.last()) {
            return last.roots;
        }
        self.genesis
            .lock()
            .get(&collection)
            .copied()
            .unwrap_or(MapRoots {
                content: empty_root(),
                counter: empty_root(),
            })
    }
}

#[async_trait::async_trait]
impl SettlementTarget for InMemoryLedger {
    async fn settle(&self, artifact: &ProofArtifact) -> Result<SettlementReceipt, SettlementError> {
        let s = artifact.statement;
        let settled = self.current(s.collection);
        if settled != s.initial {
            return Err(SettlementError::RootMismatch {
                collection: s.collection,
                settled,
                claimed: s.initial,
            });
        }
        let mut history = self.history.lock();
        let entries = history.entry(s.collection).or_default();
        let receipt = SettlementReceipt {
            collection: s.collection,
            batch: entries.len() as u64 + 1,
            previous: s.initial,
            roots: s.latest,
            transitions: s.len(),
            settled_at: Utc::now(),
        };
        entries.push(receipt.clone());
        Ok(receipt)
    }

    async fn settled_roots(&self, collection: Collection) -> Result<MapRoots, SettlementError> {
        Ok(self.current(collection))
    }
}
