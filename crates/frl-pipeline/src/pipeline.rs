//! # Proof Pipeline Coordinator
//!
//! Owns the per-collection single-writer state and wires the Transition
//! Builder, the job queue, the map stores and the Merge Scheduler together.
//!
//! ## Two views per collection
//!
//! - **committed**: the Authenticated Map Store proper. Advanced only when
//!   the proof for the next transition in submission order has completed.
//! - **staged**: committed plus every accepted-but-unproven transition, in
//!   order. New submissions are built against it so consecutive mutations
//!   chain without waiting for their predecessors' proofs.
//!
//! ```text
//! submit ──build(staged)──▶ enqueue prove ──▶ staged.apply
//!                                   │
//!              prove completed ◀────┘  (any order)
//!                    │
//!   commit in index order: committed.apply ─▶ upsert record ─▶ scheduler
//!                                                                 │
//!                                     merge jobs ◀── take_ready_pairs
//! ```
//!
//! ## Security Invariant
//!
//! A collection that has diverged (replay or settlement disagrees with the
//! committed roots) accepts nothing until [`ProofPipeline::regenerate`] has
//! rebuilt it from durable records.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use frl_core::{Collection, ConflictError, FrlError, Hash, JobId};
use frl_queue::{FailureCause, FinishedJob, JobKind, JobOutcome, JobPayload, JobQueue, QueueError};
use frl_state::{
    AuthenticatedMapStore, MapRoots, MutationRequest, RecordStore, StateRegenerator,
    TransitionBuilder, TransitionDescriptor,
};
use frl_zkp::{ProofArtifact, ProofStatement};
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};

use crate::config::PipelineConfig;
use crate::scheduler::MergeScheduler;
use crate::settlement::{SettlementError, SettlementReceipt, SettlementTarget};

const UPSERT_ATTEMPTS: u32 = 3;

/// A transition whose commit has happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReceipt {
    /// Collection.
    pub collection: Collection,
    /// Transition index.
    pub index: u64,
    /// Prove job that attested it.
    pub job_id: JobId,
    /// Committed roots after the transition.
    pub roots: MapRoots,
}

/// Acknowledgement of an accepted submission.
///
/// The transition is staged and its prove job enqueued; [`committed`]
/// resolves once the proof has completed and the map commit happened, or
/// with the error that rejected the transition.
///
/// [`committed`]: SubmissionReceipt::committed
#[derive(Debug)]
pub struct SubmissionReceipt {
    /// Prove job id.
    pub job_id: JobId,
    /// Collection.
    pub collection: Collection,
    /// Transition index within the collection.
    pub index: u64,
    /// Roots the transition starts from.
    pub initial: MapRoots,
    /// Roots the transition claims to reach.
    pub latest: MapRoots,
    outcome: oneshot::Receiver<Result<CommitReceipt, FrlError>>,
}

impl SubmissionReceipt {
    /// Wait for the commit or rejection of this transition.
    pub async fn committed(self) -> Result<CommitReceipt, FrlError> {
        self.outcome.await.map_err(|_| {
            FrlError::TransientInfra("pipeline dropped the submission".to_string())
        })?
    }
}

/// Point-in-time view of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStatus {
    /// Collection.
    pub collection: Collection,
    /// Roots of the committed store.
    pub committed: MapRoots,
    /// Roots of the staged store.
    pub staged: MapRoots,
    /// Index the next submission will get.
    pub next_index: u64,
    /// Index the next commit will have.
    pub commit_index: u64,
    /// Staged transitions not yet committed.
    pub in_flight: usize,
    /// Proofs waiting in the Merge Scheduler.
    pub pending_proofs: usize,
    /// Outstanding merge jobs.
    pub merges_in_flight: usize,
    /// Merge pairs held back after a terminal failure.
    pub blocked_merges: usize,
    /// Whether the collection is halted on divergence.
    pub halted: bool,
    /// Roots last accepted by the settlement target.
    pub settled: Option<MapRoots>,
}

struct InFlight {
    job_id: JobId,
    descriptor: TransitionDescriptor,
    artifact: Option<ProofArtifact>,
    responder: Option<oneshot::Sender<Result<CommitReceipt, FrlError>>>,
}

impl InFlight {
    fn respond(&mut self, result: Result<CommitReceipt, FrlError>) {
        if let Some(tx) = self.responder.take() {
            // The submitter may have stopped waiting.
            let _ = tx.send(result);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Halt {
    expected: Hash,
    actual: Hash,
}

struct CollectionState {
    collection: Collection,
    committed: AuthenticatedMapStore,
    staged: AuthenticatedMapStore,
    next_index: u64,
    commit_index: u64,
    in_flight: BTreeMap<u64, InFlight>,
    prove_jobs: HashMap<JobId, u64>,
    scheduler: MergeScheduler,
    halted: Option<Halt>,
    settled: Option<MapRoots>,
}

impl CollectionState {
    fn new(collection: Collection) -> Self {
        let store = AuthenticatedMapStore::new(collection);
        Self {
            collection,
            committed: store.clone(),
            staged: store,
            next_index: 0,
            commit_index: 0,
            in_flight: BTreeMap::new(),
            prove_jobs: HashMap::new(),
            scheduler: MergeScheduler::new(collection, 0),
            halted: None,
            settled: None,
        }
    }

    fn divergence(&self, halt: Halt) -> FrlError {
        FrlError::DivergenceDetected {
            collection: self.collection,
            expected: halt.expected,
            actual: halt.actual,
        }
    }

    fn ensure_live(&self) -> Result<(), FrlError> {
        match self.halted {
            Some(halt) => Err(self.divergence(halt)),
            None => Ok(()),
        }
    }

    fn halt(&mut self, expected: Hash, actual: Hash) {
        tracing::error!(
            collection = %self.collection,
            expected = %expected,
            actual = %actual,
            "collection halted on divergence"
        );
        self.halted = Some(Halt { expected, actual });
    }

    /// Reject every in-flight transition and forget its prove job.
    fn abandon_in_flight(&mut self, from: u64, actual: Hash) {
        let dropped = self.in_flight.split_off(&from);
        for (_, mut entry) in dropped {
            self.prove_jobs.remove(&entry.job_id);
            let expected = entry.descriptor.initial_content_root;
            entry.respond(Err(ConflictError::StaleRoot { expected, actual }.into()));
        }
    }

    fn status(&self) -> CollectionStatus {
        CollectionStatus {
            collection: self.collection,
            committed: self.committed.roots(),
            staged: self.staged.roots(),
            next_index: self.next_index,
            commit_index: self.commit_index,
            in_flight: self.in_flight.len(),
            pending_proofs: self.scheduler.pending_len(),
            merges_in_flight: self.scheduler.in_flight_len(),
            blocked_merges: self.scheduler.blocked_len(),
            halted: self.halted.is_some(),
            settled: self.settled,
        }
    }
}

/// Coordinator for every collection.
pub struct ProofPipeline {
    queue: Arc<dyn JobQueue>,
    records: Arc<dyn RecordStore>,
    regenerator: StateRegenerator,
    config: PipelineConfig,
    states: HashMap<Collection, Arc<Mutex<CollectionState>>>,
}

impl ProofPipeline {
    /// A coordinator with empty collections. Call [`bootstrap`](Self::bootstrap)
    /// before accepting submissions when the record store is not empty.
    pub fn new(queue: Arc<dyn JobQueue>, records: Arc<dyn RecordStore>, config: PipelineConfig) -> Self {
        let states = Collection::ALL
            .into_iter()
            .map(|c| (c, Arc::new(Mutex::new(CollectionState::new(c)))))
            .collect();
        Self {
            regenerator: StateRegenerator::new(Arc::clone(&records)),
            queue,
            records,
            config,
            states,
        }
    }

    fn state(&self, collection: Collection) -> Result<&Arc<Mutex<CollectionState>>, FrlError> {
        self.states.get(&collection).ok_or_else(|| {
            FrlError::TransientInfra(format!("no state for collection {collection}"))
        })
    }

    /// Regenerate every collection from durable records.
    pub async fn bootstrap(&self) -> Result<(), FrlError> {
        for collection in Collection::ALL {
            self.regenerate(collection).await?;
        }
        Ok(())
    }

    /// Accept a mutation: build its transition against the staged view,
    /// enqueue the prove job and stage the transition.
    pub async fn submit(&self, request: MutationRequest) -> Result<SubmissionReceipt, FrlError> {
        let collection = request.record.collection();
        let mut st = self.state(collection)?.lock().await;
        st.ensure_live()?;

        let index = st.next_index;
        let descriptor = TransitionBuilder::build(&st.staged, index, &request)?;
        let job_id = self
            .queue
            .enqueue(
                JobPayload::Prove { transition: Box::new(descriptor.clone()) },
                self.config.max_attempts,
            )
            .await?;
        st.staged.apply(&descriptor)?;

        let (tx, rx) = oneshot::channel();
        let initial = descriptor.initial_roots();
        let latest = descriptor.latest_roots();
        tracing::info!(
            collection = %collection,
            index,
            job_id = %job_id,
            kind = descriptor.kind.name(),
            author = %request.record.author,
            content_id = %request.record.content_id,
            "transition staged"
        );
        st.in_flight.insert(
            index,
            InFlight { job_id, descriptor, artifact: None, responder: Some(tx) },
        );
        st.prove_jobs.insert(job_id, index);
        st.next_index += 1;

        Ok(SubmissionReceipt { job_id, collection, index, initial, latest, outcome: rx })
    }

    /// Drain terminal job outcomes until the queue closes.
    pub async fn run(&self) -> Result<(), FrlError> {
        loop {
            match self.queue.next_finished().await {
                Ok(finished) => self.handle(finished).await,
                Err(QueueError::Closed) => {
                    tracing::info!("job queue closed; coordinator stopping");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "could not read finished jobs; retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Wait for and handle exactly one terminal job outcome.
    pub async fn process_next(&self) -> Result<(), FrlError> {
        let finished = self.queue.next_finished().await?;
        self.handle(finished).await;
        Ok(())
    }

    /// Route one terminal outcome to its collection.
    pub async fn handle(&self, finished: FinishedJob) {
        let Ok(state) = self.state(finished.collection) else {
            return;
        };
        let mut st = state.lock().await;
        match (finished.kind, finished.outcome) {
            (JobKind::Prove, outcome) => {
                let Some(&index) = st.prove_jobs.get(&finished.id) else {
                    tracing::debug!(job_id = %finished.id, "outcome for unknown prove job ignored");
                    return;
                };
                match outcome {
                    JobOutcome::Completed(artifact) => {
                        self.on_proved(&mut st, index, artifact).await;
                    }
                    JobOutcome::Failed { error, attempts, cause } => {
                        on_prove_failed(&mut st, index, error, attempts, cause);
                    }
                }
            }
            (JobKind::Merge, JobOutcome::Completed(artifact)) => {
                if !st.scheduler.owns(&finished.id) {
                    tracing::debug!(job_id = %finished.id, "outcome for unknown merge job ignored");
                    return;
                }
                let (first, last) = (artifact.statement.first, artifact.statement.last);
                if st.scheduler.on_merged(finished.id, artifact) {
                    tracing::info!(collection = %st.collection, job_id = %finished.id, first, last, "merge completed");
                }
                self.schedule_merges(&mut st).await;
            }
            (JobKind::Merge, JobOutcome::Failed { error, attempts, .. }) => {
                if st.scheduler.on_merge_failed(finished.id) {
                    tracing::error!(
                        collection = %st.collection,
                        job_id = %finished.id,
                        attempts,
                        error = %error,
                        "merge failed terminally; pair blocked until resumed"
                    );
                }
            }
        }
    }

    async fn on_proved(&self, st: &mut CollectionState, index: u64, artifact: ProofArtifact) {
        let Some(entry) = st.in_flight.get_mut(&index) else {
            return;
        };
        if artifact.statement != ProofStatement::for_transition(&entry.descriptor) {
            let error = format!(
                "proof covers {}..={} but transition {index} was submitted",
                artifact.statement.first, artifact.statement.last
            );
            on_prove_failed(st, index, error, 0, FailureCause::Rejected);
            return;
        }
        entry.artifact = Some(artifact);
        self.commit_ready(st).await;
        self.schedule_merges(st).await;
    }

    /// Commit every proven transition at the head of the in-flight list.
    async fn commit_ready(&self, st: &mut CollectionState) {
        loop {
            let index = st.commit_index;
            let ready = st
                .in_flight
                .get(&index)
                .is_some_and(|entry| entry.artifact.is_some());
            if !ready || st.halted.is_some() {
                return;
            }
            let Some(mut entry) = st.in_flight.remove(&index) else {
                return;
            };
            st.prove_jobs.remove(&entry.job_id);
            let Some(artifact) = entry.artifact.take() else {
                return;
            };

            let before = st.committed.root();
            let roots = match st.committed.apply(&entry.descriptor) {
                Ok(roots) => roots,
                Err(e) => {
                    st.halt(entry.descriptor.latest_content_root, before);
                    entry.respond(Err(e));
                    return;
                }
            };

            if let Err(e) = self.persist(&entry.descriptor).await {
                // The map moved but the durable rows did not.
                st.halt(before, roots.content);
                entry.respond(Err(e));
                return;
            }

            st.commit_index += 1;
            st.scheduler.insert(artifact);
            metrics::counter!("frl_transitions_committed_total", "collection" => st.collection.as_str())
                .increment(1);
            tracing::info!(
                collection = %st.collection,
                index,
                job_id = %entry.job_id,
                content_root = %roots.content,
                counter_root = %roots.counter,
                "transition committed"
            );
            let receipt = CommitReceipt {
                collection: st.collection,
                index,
                job_id: entry.job_id,
                roots,
            };
            entry.respond(Ok(receipt));
        }
    }

    async fn persist(&self, descriptor: &TransitionDescriptor) -> Result<(), FrlError> {
        let mut attempt = 1;
        loop {
            match self.records.upsert(&descriptor.record_after).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < UPSERT_ATTEMPTS => {
                    tracing::warn!(
                        collection = %descriptor.collection,
                        index = descriptor.index,
                        attempt,
                        error = %e,
                        "record upsert failed; retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Enqueue a merge job for every ready pair.
    async fn schedule_merges(&self, st: &mut CollectionState) {
        let mut pairs = st.scheduler.take_ready_pairs().into_iter();
        while let Some(pair) = pairs.next() {
            let payload = JobPayload::Merge {
                left: Box::new(pair.left.clone()),
                right: Box::new(pair.right.clone()),
            };
            match self.queue.enqueue(payload, self.config.merge_max_attempts).await {
                Ok(id) => {
                    metrics::counter!("frl_merges_scheduled_total", "collection" => st.collection.as_str())
                        .increment(1);
                    tracing::info!(
                        collection = %st.collection,
                        job_id = %id,
                        first = pair.left.statement.first,
                        last = pair.right.statement.last,
                        "merge scheduled"
                    );
                    st.scheduler.track(id, pair);
                }
                Err(e) => {
                    tracing::warn!(collection = %st.collection, error = %e, "could not enqueue merge");
                    st.scheduler.release(pair);
                    for rest in pairs.by_ref() {
                        st.scheduler.release(rest);
                    }
                }
            }
        }
    }

    /// Replay durable records and compare with the committed roots.
    ///
    /// On mismatch the collection is halted and `DivergenceDetected` returned.
    pub async fn check_divergence(&self, collection: Collection) -> Result<MapRoots, FrlError> {
        let mut st = self.state(collection)?.lock().await;
        st.ensure_live()?;
        let replayed = self.regenerator.rebuild(collection).await?;
        let held = st.committed.roots();
        if replayed == held {
            tracing::debug!(collection = %collection, root = %held.content, "no divergence");
            return Ok(held);
        }
        let (expected, actual) = if replayed.content != held.content {
            (replayed.content, held.content)
        } else {
            (replayed.counter, held.counter)
        };
        st.halt(expected, actual);
        Err(st.divergence(Halt { expected, actual }))
    }

    /// Rebuild a collection from durable records and reopen it.
    ///
    /// Every in-flight transition is rejected with `StaleRoot` and pending
    /// proofs are dropped; the next batch starts at index 0 from the
    /// regenerated roots.
    pub async fn regenerate(&self, collection: Collection) -> Result<MapRoots, FrlError> {
        let mut st = self.state(collection)?.lock().await;
        let store = self.regenerator.rebuild_store(collection).await?;
        let roots = store.roots();
        st.abandon_in_flight(0, roots.content);
        st.prove_jobs.clear();
        st.committed = store.clone();
        st.staged = store;
        st.next_index = 0;
        st.commit_index = 0;
        st.scheduler.reset(0);
        if st.halted.take().is_some() {
            tracing::warn!(collection = %collection, root = %roots.content, "collection reopened after regeneration");
        }
        Ok(roots)
    }

    /// Settle the aggregate proof of the open batch.
    ///
    /// The first call seals the batch at the current commit index, so the
    /// batch is `[batch_start, commit_index)` as of that call. Transitions
    /// committed later belong to the next batch and may still be in flight.
    /// Returns `Ok(None)` while the sealed batch is still being merged or
    /// when nothing has been committed since the last settlement.
    pub async fn settle(
        &self,
        collection: Collection,
        target: &dyn SettlementTarget,
    ) -> Result<Option<SettlementReceipt>, FrlError> {
        let mut st = self.state(collection)?.lock().await;
        st.ensure_live()?;
        let commit_index = st.commit_index;
        if st.scheduler.seal(commit_index).is_none() {
            return Ok(None);
        }
        let Some(aggregate) = st.scheduler.aggregate().cloned() else {
            return Ok(None);
        };
        match target.settle(&aggregate).await {
            Ok(receipt) => {
                st.scheduler.take_aggregate();
                st.settled = Some(receipt.roots);
                self.schedule_merges(&mut st).await;
                tracing::info!(
                    collection = %collection,
                    batch = receipt.batch,
                    transitions = receipt.transitions,
                    root = %receipt.roots.content,
                    "batch settled"
                );
                Ok(Some(receipt))
            }
            Err(SettlementError::RootMismatch { settled, claimed, .. }) => {
                st.halt(settled.content, claimed.content);
                Err(st.divergence(Halt { expected: settled.content, actual: claimed.content }))
            }
            Err(SettlementError::Unavailable(e)) => Err(FrlError::TransientInfra(e)),
        }
    }

    /// Unblock merge pairs held back by terminal failures and schedule them.
    pub async fn resume_merges(&self, collection: Collection) -> Result<usize, FrlError> {
        let mut st = self.state(collection)?.lock().await;
        let n = st.scheduler.resume();
        self.schedule_merges(&mut st).await;
        if n > 0 {
            tracing::info!(collection = %collection, unblocked = n, "merges resumed");
        }
        Ok(n)
    }

    /// Committed roots of `collection`.
    pub async fn roots(&self, collection: Collection) -> Result<MapRoots, FrlError> {
        Ok(self.state(collection)?.lock().await.committed.roots())
    }

    /// Snapshot of `collection`.
    pub async fn status(&self, collection: Collection) -> Result<CollectionStatus, FrlError> {
        Ok(self.state(collection)?.lock().await.status())
    }
}

impl std::fmt::Debug for ProofPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A prove job failed terminally: reject it and everything staged after it,
/// then rebuild the staged view from committed plus the survivors.
///
/// A backend rejection reaches the submitter as `ProvingFailure`; running out
/// of attempts or leases on infrastructure faults as `TransientInfra`.
fn on_prove_failed(
    st: &mut CollectionState,
    index: u64,
    error: String,
    attempts: u32,
    cause: FailureCause,
) {
    tracing::error!(
        collection = %st.collection,
        index,
        attempts,
        cause = cause.as_str(),
        error = %error,
        "prove job failed terminally"
    );
    let Some(mut failed) = st.in_flight.remove(&index) else {
        return;
    };
    st.prove_jobs.remove(&failed.job_id);

    let mut staged = st.committed.clone();
    for entry in st.in_flight.range(..index).map(|(_, e)| e) {
        if let Err(e) = staged.apply(&entry.descriptor) {
            tracing::error!(collection = %st.collection, index = entry.descriptor.index, error = %e, "restaging failed");
        }
    }
    let actual = staged.root();
    st.staged = staged;
    st.abandon_in_flight(index + 1, actual);
    st.next_index = index;
    failed.respond(Err(match cause {
        FailureCause::Rejected => FrlError::ProvingFailure(error),
        FailureCause::Infrastructure => FrlError::TransientInfra(error),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use frl_core::ContentId;
    use frl_crypto::Ed25519KeyPair;
    use frl_queue::InMemoryJobQueue;
    use frl_state::{ContentBody, ContentFlags, ContentRecord, InMemoryRecordStore, TransitionKind};
    use frl_zkp::{MockProvingBackend, ProvingBackend};

    use crate::settlement::InMemoryLedger;

    struct Harness {
        queue: Arc<InMemoryJobQueue>,
        records: Arc<InMemoryRecordStore>,
        backend: MockProvingBackend,
        pipeline: ProofPipeline,
        key: Ed25519KeyPair,
    }

    fn harness() -> Harness {
        let queue = Arc::new(InMemoryJobQueue::new(Duration::from_secs(60), Duration::from_millis(5)));
        let records = Arc::new(InMemoryRecordStore::new());
        let pipeline = ProofPipeline::new(queue.clone(), records.clone(), PipelineConfig::default());
        let backend = MockProvingBackend::new();
        backend.compile().unwrap();
        Harness { queue, records, backend, pipeline, key: Ed25519KeyPair::from_seed(&[5u8; 32]) }
    }

    fn post(key: &Ed25519KeyPair, id: &str, seq: u64) -> MutationRequest {
        MutationRequest {
            kind: TransitionKind::Create,
            record: ContentRecord::sign(
                key,
                ContentId::new(id).unwrap(),
                ContentBody::Post { blob_cid: format!("blob-{id}") },
                seq,
                seq,
                ContentFlags::LIVE,
            )
            .unwrap(),
        }
    }

    impl Harness {
        /// Claim the next job, run it on the mock backend and report the result.
        async fn work_one(&self) -> JobId {
            let job = self.queue.try_claim().await.unwrap().expect("a queued job");
            let result = match &job.payload {
                JobPayload::Prove { transition } => self.backend.prove(transition),
                JobPayload::Merge { left, right } => self.backend.merge(left, right),
            };
            match result {
                Ok(artifact) => self.queue.complete(job.id, artifact).await.unwrap(),
                Err(e) => self.queue.fail(job.id, &e.to_string(), false).await.unwrap(),
            };
            job.id
        }

        async fn drain(&self) {
            while self.queue.pending() > 0 {
                self.work_one().await;
                self.pipeline.process_next().await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn consecutive_submissions_chain_on_staged_roots() {
        let h = harness();
        let r0 = h.pipeline.submit(post(&h.key, "c1", 1)).await.unwrap();
        let r1 = h.pipeline.submit(post(&h.key, "c2", 2)).await.unwrap();
        assert_eq!(r0.index, 0);
        assert_eq!(r1.index, 1);
        assert_eq!(r0.latest, r1.initial);

        let status = h.pipeline.status(Collection::Posts).await.unwrap();
        assert_eq!(status.in_flight, 2);
        assert_eq!(status.committed, r0.initial);
        assert_eq!(status.staged, r1.latest);
        assert_eq!(h.records.len(), 0);
    }

    #[tokio::test]
    async fn commits_wait_for_predecessor_proof() {
        let h = harness();
        let r0 = h.pipeline.submit(post(&h.key, "c1", 1)).await.unwrap();
        let r1 = h.pipeline.submit(post(&h.key, "c2", 2)).await.unwrap();

        // Prove the second transition first.
        let first = h.queue.try_claim().await.unwrap().unwrap();
        let second = h.queue.try_claim().await.unwrap().unwrap();
        let JobPayload::Prove { transition } = &second.payload else { panic!("prove job") };
        h.queue.complete(second.id, h.backend.prove(transition).unwrap()).await.unwrap();
        h.pipeline.process_next().await.unwrap();
        assert_eq!(h.pipeline.roots(Collection::Posts).await.unwrap(), r0.initial);

        let JobPayload::Prove { transition } = &first.payload else { panic!("prove job") };
        h.queue.complete(first.id, h.backend.prove(transition).unwrap()).await.unwrap();
        h.pipeline.process_next().await.unwrap();

        let c0 = r0.committed().await.unwrap();
        let c1 = r1.committed().await.unwrap();
        assert_eq!(c0.index, 0);
        assert_eq!(c1.roots, h.pipeline.roots(Collection::Posts).await.unwrap());
        assert_eq!(h.records.len(), 2);

        let status = h.pipeline.status(Collection::Posts).await.unwrap();
        assert_eq!(status.merges_in_flight, 1);
    }

    #[tokio::test]
    async fn prove_failure_rejects_later_transitions() {
        let h = harness();
        let r0 = h.pipeline.submit(post(&h.key, "c1", 1)).await.unwrap();
        let r1 = h.pipeline.submit(post(&h.key, "c2", 2)).await.unwrap();
        let r2 = h.pipeline.submit(post(&h.key, "c3", 3)).await.unwrap();

        let j0 = h.queue.try_claim().await.unwrap().unwrap();
        let j1 = h.queue.try_claim().await.unwrap().unwrap();
        h.queue.fail(j1.id, "invalid transition: forced", false).await.unwrap();
        h.pipeline.process_next().await.unwrap();

        assert!(matches!(r1.committed().await, Err(FrlError::ProvingFailure(_))));
        assert!(matches!(
            r2.committed().await,
            Err(FrlError::SemanticConflict(ConflictError::StaleRoot { .. }))
        ));
        let status = h.pipeline.status(Collection::Posts).await.unwrap();
        assert_eq!(status.next_index, 1);
        assert_eq!(status.staged, r0.latest);

        // The earlier transition is unaffected.
        let JobPayload::Prove { transition } = &j0.payload else { panic!("prove job") };
        h.queue.complete(j0.id, h.backend.prove(transition).unwrap()).await.unwrap();
        h.pipeline.process_next().await.unwrap();
        let r0_latest = r0.latest;
        assert_eq!(r0.committed().await.unwrap().roots, r0_latest);

        // The author retries with the same sequence number at the reused index.
        let retry = h.pipeline.submit(post(&h.key, "c2", 2)).await.unwrap();
        assert_eq!(retry.index, 1);
        assert_eq!(retry.initial, r0_latest);
    }

    #[tokio::test]
    async fn semantic_conflicts_never_reach_the_queue() {
        let h = harness();
        h.pipeline.submit(post(&h.key, "c1", 1)).await.unwrap();
        let err = h.pipeline.submit(post(&h.key, "c1", 2)).await.unwrap_err();
        assert!(matches!(err, FrlError::SemanticConflict(ConflictError::DuplicateContent { .. })));
        let err = h.pipeline.submit(post(&h.key, "c9", 5)).await.unwrap_err();
        assert!(matches!(err, FrlError::SemanticConflict(ConflictError::SequenceMismatch { .. })));
        assert_eq!(h.queue.pending(), 1);
    }

    #[tokio::test]
    async fn duplicate_and_unknown_outcomes_are_ignored() {
        let h = harness();
        let r0 = h.pipeline.submit(post(&h.key, "c1", 1)).await.unwrap();
        h.work_one().await;
        let finished = h.queue.next_finished().await.unwrap();
        h.pipeline.handle(finished.clone()).await;
        h.pipeline.handle(finished).await;
        assert_eq!(r0.committed().await.unwrap().index, 0);
        assert_eq!(h.pipeline.status(Collection::Posts).await.unwrap().commit_index, 1);
    }

    #[tokio::test]
    async fn divergence_halts_until_regenerated() {
        let h = harness();
        let r0 = h.pipeline.submit(post(&h.key, "c1", 1)).await.unwrap();
        h.drain().await;
        r0.committed().await.unwrap();
        assert!(h.pipeline.check_divergence(Collection::Posts).await.is_ok());

        // A row lands in durable storage behind the pipeline's back.
        let other = Ed25519KeyPair::from_seed(&[6u8; 32]);
        h.records.upsert(&post(&other, "x", 1).record).await.unwrap();

        let err = h.pipeline.check_divergence(Collection::Posts).await.unwrap_err();
        assert!(matches!(err, FrlError::DivergenceDetected { .. }));
        let err = h.pipeline.submit(post(&h.key, "c2", 2)).await.unwrap_err();
        assert!(matches!(err, FrlError::DivergenceDetected { .. }));

        let roots = h.pipeline.regenerate(Collection::Posts).await.unwrap();
        assert_eq!(h.pipeline.check_divergence(Collection::Posts).await.unwrap(), roots);
        assert!(h.pipeline.submit(post(&h.key, "c2", 2)).await.is_ok());
    }

    #[tokio::test]
    async fn regenerate_rejects_in_flight_transitions() {
        let h = harness();
        let r0 = h.pipeline.submit(post(&h.key, "c1", 1)).await.unwrap();
        h.pipeline.regenerate(Collection::Posts).await.unwrap();
        assert!(matches!(
            r0.committed().await,
            Err(FrlError::SemanticConflict(ConflictError::StaleRoot { .. }))
        ));
        // The orphaned prove job completes but is ignored.
        h.drain().await;
        assert_eq!(h.pipeline.status(Collection::Posts).await.unwrap().commit_index, 0);
    }

    #[tokio::test]
    async fn batch_settles_once_reduced() {
        let h = harness();
        let ledger = InMemoryLedger::new();
        let mut receipts = Vec::new();
        for (i, id) in ["c1", "c2", "c3"].into_iter().enumerate() {
            receipts.push(h.pipeline.submit(post(&h.key, id, i as u64 + 1)).await.unwrap());
        }
        let (initial, latest) = (receipts[0].initial, receipts[2].latest);
        assert!(h.pipeline.settle(Collection::Posts, &ledger).await.unwrap().is_none());

        h.drain().await;
        let receipt = h
            .pipeline
            .settle(Collection::Posts, &ledger)
            .await
            .unwrap()
            .expect("aggregate ready");
        assert_eq!(receipt.previous, initial);
        assert_eq!(receipt.roots, latest);
        assert_eq!(receipt.transitions, 3);

        let status = h.pipeline.status(Collection::Posts).await.unwrap();
        assert_eq!(status.pending_proofs, 0);
        assert_eq!(status.settled, Some(latest));
        assert!(h.pipeline.settle(Collection::Posts, &ledger).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn settlement_does_not_wait_for_later_transitions() {
        let h = harness();
        let ledger = InMemoryLedger::new();
        let r0 = h.pipeline.submit(post(&h.key, "c1", 1)).await.unwrap();
        let r1 = h.pipeline.submit(post(&h.key, "c2", 2)).await.unwrap();
        for _ in 0..2 {
            h.work_one().await;
            h.pipeline.process_next().await.unwrap();
        }
        // Seals the batch at [0, 2) while its merge is outstanding.
        assert!(h.pipeline.settle(Collection::Posts, &ledger).await.unwrap().is_none());

        let r2 = h.pipeline.submit(post(&h.key, "c3", 3)).await.unwrap();
        h.work_one().await;
        h.pipeline.process_next().await.unwrap();
        assert_eq!(h.pipeline.status(Collection::Posts).await.unwrap().in_flight, 1);

        let first = h
            .pipeline
            .settle(Collection::Posts, &ledger)
            .await
            .unwrap()
            .expect("sealed batch reduced");
        assert_eq!(first.transitions, 2);
        assert_eq!(first.previous, r0.initial);
        assert_eq!(first.roots, r1.latest);

        h.drain().await;
        let r2_latest = r2.latest;
        assert_eq!(r2.committed().await.unwrap().index, 2);
        let second = h
            .pipeline
            .settle(Collection::Posts, &ledger)
            .await
            .unwrap()
            .expect("next batch");
        assert_eq!(second.batch, 2);
        assert_eq!(second.transitions, 1);
        assert_eq!(second.previous, r1.latest);
        assert_eq!(second.roots, r2_latest);
    }

    #[tokio::test]
    async fn settlement_root_mismatch_halts_collection() {
        let h = harness();
        let ledger = InMemoryLedger::new().with_genesis(
            Collection::Posts,
            MapRoots { content: Hash::from_u64(1), counter: Hash::from_u64(2) },
        );
        h.pipeline.submit(post(&h.key, "c1", 1)).await.unwrap();
        h.drain().await;
        let err = h.pipeline.settle(Collection::Posts, &ledger).await.unwrap_err();
        assert!(matches!(err, FrlError::DivergenceDetected { .. }));
        assert!(h.pipeline.status(Collection::Posts).await.unwrap().halted);
    }

    #[tokio::test]
    async fn collections_are_independent() {
        let h = harness();
        let post_receipt = h.pipeline.submit(post(&h.key, "p1", 1)).await.unwrap();
        let comment = MutationRequest {
            kind: TransitionKind::Create,
            record: ContentRecord::sign(
                &h.key,
                ContentId::new("k1").unwrap(),
                ContentBody::Comment {
                    target: post_receipt_target(&h.key),
                    blob_cid: "blob-k1".into(),
                },
                1,
                1,
                ContentFlags::LIVE,
            )
            .unwrap(),
        };
        let comment_receipt = h.pipeline.submit(comment).await.unwrap();
        assert_eq!(comment_receipt.collection, Collection::Comments);
        assert_eq!(comment_receipt.index, 0);
        assert_eq!(post_receipt.index, 0);
    }

    fn post_receipt_target(key: &Ed25519KeyPair) -> frl_state::ContentRef {
        frl_state::ContentRef {
            collection: Collection::Posts,
            author: key.address(),
            content_id: ContentId::new("p1").unwrap(),
        }
    }
}
