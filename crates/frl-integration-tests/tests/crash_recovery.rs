//! # Worker Crash Recovery
//!
//! A worker dies mid-proof. Its job becomes claimable once the lease runs
//! out, another pool completes it, and the transition commits exactly once.
//! A late report from the dead worker is discarded.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use frl_pipeline::WorkerPool;
use frl_queue::{Ack, JobQueue, JobState};
use frl_zkp::{MockProvingBackend, ProofArtifact, ProofStatement};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abandoned_job_is_reclaimed_and_committed_once() {
    let rig = Rig::new(Duration::from_millis(300)).spawn_coordinator();

    let slow = MockProvingBackend::new().with_prove_delay(Duration::from_millis(800));
    let pool_a = WorkerPool::start(rig.queue.clone(), Arc::new(slow), 1).await.unwrap();

    let a = author(1);
    let submitted = rig.pipeline.submit(create(post_record(&a, "c1", 1))).await.unwrap();
    let job_id = submitted.job_id;
    let (initial, latest) = (submitted.initial, submitted.latest);

    let queue = &rig.queue;
    let locked = eventually(Duration::from_secs(2), move || async move {
        let job = queue.get(job_id).await.unwrap()?;
        (job.state == JobState::Locked).then_some(job)
    })
    .await
    .expect("pool A claims the job");
    assert_eq!(locked.attempts, 1);

    // Crash.
    pool_a.abort();

    let pool_b = WorkerPool::start(rig.queue.clone(), Arc::new(MockProvingBackend::new()), 1)
        .await
        .unwrap();
    let committed = tokio::time::timeout(Duration::from_secs(5), submitted.committed())
        .await
        .expect("committed after reclaim")
        .unwrap();
    assert_eq!(committed.index, 0);

    let job = rig.queue.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 2);

    // Pool A's proof arrives late.
    let artifact = ProofArtifact {
        statement: ProofStatement { collection: POSTS, first: 0, last: 0, initial, latest },
        proof: vec![0xaa],
    };
    assert_eq!(rig.queue.complete(job_id, artifact).await.unwrap(), Ack::Duplicate);

    let status = rig.pipeline.status(POSTS).await.unwrap();
    assert_eq!(status.commit_index, 1);
    assert_eq!(rig.records.len(), 1);

    pool_b.shutdown().await;
}

#[tokio::test]
async fn job_fails_terminally_after_repeated_crashes() {
    let rig = Rig::new(Duration::from_millis(50));
    let a = author(2);
    let submitted = rig.pipeline.submit(create(post_record(&a, "c1", 1))).await.unwrap();

    // Three claims that never report, matching the default attempt bound.
    for attempt in 1..=3 {
        let job = rig.queue.try_claim().await.unwrap().expect("claimable");
        assert_eq!(job.attempts, attempt);
        tokio::time::sleep(Duration::from_millis(80)).await;
    }
    assert!(rig.queue.try_claim().await.unwrap().is_none());

    rig.pipeline.process_next().await.unwrap();
    let err = submitted.committed().await.unwrap_err();
    assert!(matches!(err, frl_core::FrlError::TransientInfra(ref msg) if msg.contains("lease expired")));
    assert_eq!(rig.pipeline.status(POSTS).await.unwrap().next_index, 0);
}
