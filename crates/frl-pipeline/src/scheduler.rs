//! # Merge Scheduler
//!
//! Folds the committed proofs of one collection into a single aggregate by
//! strict left-to-right binary reduction: the accumulated proof of the batch
//! is merged with the proof that follows it, one merge at a time.
//!
//! Proofs are held in a pending list keyed by the first transition index
//! they cover. A pair is mergeable only when the left proof starts the batch
//! and ends exactly where the right one begins (index and roots):
//!
//! ```text
//! pending: [0..2] [3] [4] [6]         merge in flight: none
//! pair:    ([0..2],[3])               [4] waits for [0..3]; [6] waits for 5
//! ```
//!
//! Settlement seals the batch at the current commit index. Proofs committed
//! afterwards start a second fold of their own and never enter the sealed
//! batch, so an aggregate can be settled while later transitions are still
//! being proved.
//!
//! A pair whose merge job fails terminally goes back to the pending list
//! but is blocked until [`MergeScheduler::resume`] is called.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use frl_core::{Collection, JobId};
use frl_zkp::ProofArtifact;

/// A pair reserved for merging, `left` before `right`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePair {
    /// Earlier range.
    pub left: ProofArtifact,
    /// Later range.
    pub right: ProofArtifact,
}

/// Pending-proof set and merge bookkeeping for one collection.
#[derive(Debug)]
pub struct MergeScheduler {
    collection: Collection,
    batch_start: u64,
    sealed_end: Option<u64>,
    pending: BTreeMap<u64, ProofArtifact>,
    in_flight: HashMap<JobId, MergePair>,
    blocked: BTreeSet<u64>,
}

impl MergeScheduler {
    /// An empty scheduler whose batch starts at transition `batch_start`.
    pub fn new(collection: Collection, batch_start: u64) -> Self {
        Self {
            collection,
            batch_start,
            sealed_end: None,
            pending: BTreeMap::new(),
            in_flight: HashMap::new(),
            blocked: BTreeSet::new(),
        }
    }

    /// Index of the first transition of the open batch.
    pub fn batch_start(&self) -> u64 {
        self.batch_start
    }

    /// Proofs waiting to be merged or settled.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Merge jobs outstanding.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Pairs held back after a terminal merge failure.
    pub fn blocked_len(&self) -> usize {
        self.blocked.len()
    }

    /// Add a committed transition proof (or a merged one).
    ///
    /// Returns `false` and drops the artifact if it belongs to another
    /// collection, precedes the batch, or overlaps a proof already held.
    pub fn insert(&mut self, artifact: ProofArtifact) -> bool {
        let s = artifact.statement;
        if s.collection != self.collection || s.first < self.batch_start {
            return false;
        }
        let overlaps_pending = self
            .pending
            .range(..=s.last)
            .next_back()
            .is_some_and(|(_, p)| p.statement.last >= s.first);
        let overlaps_merge = self.in_flight.values().any(|pair| {
            pair.left.statement.first <= s.last && s.first <= pair.right.statement.last
        });
        if overlaps_pending || overlaps_merge {
            tracing::warn!(
                collection = %self.collection,
                first = s.first,
                last = s.last,
                "overlapping proof dropped"
            );
            return false;
        }
        self.pending.insert(s.first, artifact);
        true
    }

    /// Remove and return the next pair to merge in each open fold: the
    /// sealed batch, if any, and the proofs after it.
    ///
    /// A fold hands out at most one pair at a time, and only the proof that
    /// starts the fold as the left half. The caller enqueues a merge job per
    /// pair and registers it with [`track`](Self::track), or hands it back
    /// with [`release`](Self::release).
    pub fn take_ready_pairs(&mut self) -> Vec<MergePair> {
        let folds = match self.sealed_end {
            Some(end) => vec![(self.batch_start, end), (end, u64::MAX)],
            None => vec![(self.batch_start, u64::MAX)],
        };
        folds
            .into_iter()
            .filter_map(|(start, end)| self.take_pair_within(start, end))
            .collect()
    }

    fn take_pair_within(&mut self, start: u64, end: u64) -> Option<MergePair> {
        let merging = self
            .in_flight
            .values()
            .any(|pair| (start..end).contains(&pair.left.statement.first));
        if merging || self.blocked.contains(&start) {
            return None;
        }
        let mut fold = self.pending.range(start..end);
        let (_, left) = fold.next().filter(|(first, _)| **first == start)?;
        let (&right_first, right) = fold.next()?;
        if !left.composes_with(right) {
            return None;
        }
        let left = self.pending.remove(&start)?;
        let right = self.pending.remove(&right_first)?;
        Some(MergePair { left, right })
    }

    /// Record that `pair` is being merged by job `id`.
    pub fn track(&mut self, id: JobId, pair: MergePair) {
        self.in_flight.insert(id, pair);
    }

    /// Return an untracked pair to the pending list.
    pub fn release(&mut self, pair: MergePair) {
        self.pending.insert(pair.left.statement.first, pair.left);
        self.pending.insert(pair.right.statement.first, pair.right);
    }

    /// Whether `id` is one of this scheduler's merge jobs.
    pub fn owns(&self, id: &JobId) -> bool {
        self.in_flight.contains_key(id)
    }

    /// A merge job finished. Returns `false` for an unknown job or an
    /// artifact that does not cover exactly the merged pair.
    pub fn on_merged(&mut self, id: JobId, merged: ProofArtifact) -> bool {
        let Some(pair) = self.in_flight.remove(&id) else {
            return false;
        };
        let s = merged.statement;
        let covers_pair = s.first == pair.left.statement.first
            && s.last == pair.right.statement.last
            && s.initial == pair.left.statement.initial
            && s.latest == pair.right.statement.latest;
        if !covers_pair {
            tracing::error!(
                collection = %self.collection,
                job_id = %id,
                "merged proof does not cover its inputs; pair blocked"
            );
            self.blocked.insert(pair.left.statement.first);
            self.release(pair);
            return false;
        }
        self.pending.insert(s.first, merged);
        true
    }

    /// A merge job failed terminally. The pair returns to pending, blocked.
    pub fn on_merge_failed(&mut self, id: JobId) -> bool {
        let Some(pair) = self.in_flight.remove(&id) else {
            return false;
        };
        self.blocked.insert(pair.left.statement.first);
        self.release(pair);
        true
    }

    /// Unblock every pair held back by a failure. Returns how many were unblocked.
    pub fn resume(&mut self) -> usize {
        let n = self.blocked.len();
        self.blocked.clear();
        n
    }

    /// Fix the end of the batch at `commit_end` (exclusive) unless it is
    /// already sealed. Returns the sealed end, or `None` when nothing has
    /// been committed since the batch opened.
    pub fn seal(&mut self, commit_end: u64) -> Option<u64> {
        if self.sealed_end.is_none() && commit_end > self.batch_start {
            tracing::debug!(
                collection = %self.collection,
                first = self.batch_start,
                end = commit_end,
                "batch sealed for settlement"
            );
            self.sealed_end = Some(commit_end);
        }
        self.sealed_end
    }

    /// Exclusive end of the sealed batch.
    pub fn sealed_end(&self) -> Option<u64> {
        self.sealed_end
    }

    /// The single proof covering the whole batch, if reduction is done.
    ///
    /// For a sealed batch the proof must reach the sealed end; otherwise it
    /// must be the only proof held.
    pub fn aggregate(&self) -> Option<&ProofArtifact> {
        let end = self.sealed_end.unwrap_or(u64::MAX);
        let merging = self
            .in_flight
            .values()
            .any(|pair| (self.batch_start..end).contains(&pair.left.statement.first));
        if merging {
            return None;
        }
        let proof = self.pending.get(&self.batch_start)?;
        let complete = match self.sealed_end {
            Some(end) => proof.statement.last.checked_add(1) == Some(end),
            None => self.pending.len() == 1,
        };
        complete.then_some(proof)
    }

    /// Take the aggregate and open a new batch right after it.
    pub fn take_aggregate(&mut self) -> Option<ProofArtifact> {
        self.aggregate()?;
        let artifact = self.pending.remove(&self.batch_start)?;
        self.batch_start = artifact.statement.last + 1;
        self.sealed_end = None;
        Some(artifact)
    }

    /// Drop everything and start a new batch at `batch_start`.
    pub fn reset(&mut self, batch_start: u64) {
        self.pending.clear();
        self.in_flight.clear();
        self.blocked.clear();
        self.batch_start = batch_start;
        self.sealed_end = None;
    }
}
