//! Shared fixtures for the end-to-end scenarios.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use frl_core::{Collection, ContentId};
use frl_crypto::{empty_root, Ed25519KeyPair};
use frl_pipeline::{PipelineConfig, ProofPipeline};
use frl_queue::InMemoryJobQueue;
use frl_state::{
    ContentBody, ContentFlags, ContentRecord, InMemoryRecordStore, MapRoots, MutationRequest,
    TransitionKind,
};
use tokio::task::JoinHandle;

/// Queue, record store and coordinator wired together in memory.
pub struct Rig {
    pub queue: Arc<InMemoryJobQueue>,
    pub records: Arc<InMemoryRecordStore>,
    pub pipeline: Arc<ProofPipeline>,
    coordinator: Option<JoinHandle<()>>,
}

impl Rig {
    pub fn new(lock_duration: Duration) -> Self {
        let queue = Arc::new(InMemoryJobQueue::new(lock_duration, Duration::from_millis(10)));
        let records = Arc::new(InMemoryRecordStore::new());
        let config = PipelineConfig {
            lock_duration,
            ..PipelineConfig::default()
        };
        let pipeline = Arc::new(ProofPipeline::new(queue.clone(), records.clone(), config));
        Self { queue, records, pipeline, coordinator: None }
    }

    /// Drain job outcomes in the background.
    pub fn spawn_coordinator(mut self) -> Self {
        let pipeline = Arc::clone(&self.pipeline);
        self.coordinator = Some(tokio::spawn(async move {
            let _ = pipeline.run().await;
        }));
        self
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        if let Some(handle) = self.coordinator.take() {
            handle.abort();
        }
    }
}

/// Roots of a collection nobody has written to.
pub fn empty_roots() -> MapRoots {
    MapRoots { content: empty_root(), counter: empty_root() }
}

pub fn author(seed: u8) -> Ed25519KeyPair {
    Ed25519KeyPair::from_seed(&[seed; 32])
}

pub fn post_record(key: &Ed25519KeyPair, id: &str, seq: u64) -> ContentRecord {
    ContentRecord::sign(
        key,
        ContentId::new(id).expect("valid content id"),
        ContentBody::Post { blob_cid: format!("bafy-{id}") },
        seq,
        seq,
        ContentFlags::LIVE,
    )
    .expect("record signs")
}

pub fn create(record: ContentRecord) -> MutationRequest {
    MutationRequest { kind: TransitionKind::Create, record }
}

/// Delete or restore `record`, re-signed under the author's next sequence number.
pub fn toggle(key: &Ed25519KeyPair, record: &ContentRecord, kind: TransitionKind, seq: u64) -> MutationRequest {
    let flags = match kind {
        TransitionKind::Delete => ContentFlags::DELETED,
        TransitionKind::Restore => ContentFlags::RESTORED,
        TransitionKind::Create => ContentFlags::LIVE,
    };
    MutationRequest {
        kind,
        record: record.resign(key, seq, seq, flags).expect("record signs"),
    }
}

/// Poll `check` until it yields a value or `timeout` passes.
pub async fn eventually<T, F, Fut>(timeout: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(v) = check().await {
            return Some(v);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub const POSTS: Collection = Collection::Posts;
