//! # Worker Pool
//!
//! A fixed set of tokio tasks that claim jobs from a [`JobQueue`] and run
//! them on a shared [`ProvingBackend`]. The backend is compiled once, when
//! the pool starts; proving and merging run on the blocking thread pool so
//! a long proof never stalls the runtime.
//!
//! ## Failure policy
//!
//! | Job   | Backend error                                     | Report                    |
//! |-------|---------------------------------------------------|---------------------------|
//! | prove | any                                               | `fail(retryable = false)` |
//! | merge | `Resource`                                        | `fail(retryable = true)`  |
//! | merge | `InvalidTransition`, `NonAdjacent`, `NotCompiled` | `fail(retryable = false)` |
//! | any   | backend panicked                                  | `fail(retryable = true)`  |
//!
//! Retryable failures are bounded by the job's attempt limit.
//!
//! A worker that dies before reporting leaves its job locked; the queue
//! hands it to another worker when the lease runs out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use frl_core::FrlError;
use frl_queue::{Job, JobPayload, JobQueue};
use frl_zkp::{ProofArtifact, ProofError, ProvingBackend};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Running worker tasks.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    /// Compile `backend` and start `worker_count` workers on `queue`.
    pub async fn start(
        queue: Arc<dyn JobQueue>,
        backend: Arc<dyn ProvingBackend>,
        worker_count: usize,
    ) -> Result<Self, FrlError> {
        let warm = Arc::clone(&backend);
        let started = Instant::now();
        tokio::task::spawn_blocking(move || warm.compile())
            .await
            .map_err(|e| FrlError::TransientInfra(format!("circuit compilation task failed: {e}")))?
            .map_err(|e| FrlError::ProvingFailure(format!("circuit compilation failed: {e}")))?;
        tracing::info!(
            workers = worker_count,
            compile_ms = started.elapsed().as_millis() as u64,
            "worker pool warmed"
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handles = (0..worker_count.max(1))
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let backend = Arc::clone(&backend);
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    worker_loop(worker, queue, backend, shutdown_rx).await;
                })
            })
            .collect();
        Ok(Self { handles, shutdown })
    }

    /// Number of worker tasks.
    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Ask workers to stop after their current job and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!("worker pool stopped");
    }

    /// Stop every worker immediately, abandoning jobs in progress.
    ///
    /// Abandoned jobs stay locked until their lease expires, exactly as if
    /// the process had crashed.
    pub fn abort(self) {
        for handle in &self.handles {
            handle.abort();
        }
        tracing::warn!(workers = self.handles.len(), "worker pool aborted");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handles.len())
            .finish()
    }
}

async fn worker_loop(
    worker: usize,
    queue: Arc<dyn JobQueue>,
    backend: Arc<dyn ProvingBackend>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(worker, "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let claimed = tokio::select! {
            _ = shutdown.changed() => break,
            claimed = queue.claim() => claimed,
        };
        match claimed {
            Ok(job) => run_job(worker, queue.as_ref(), &backend, job).await,
            Err(e) => {
                tracing::warn!(worker, error = %e, "claim failed; backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    tracing::debug!(worker, "worker stopped");
}

enum Failure {
    Backend(ProofError),
    Crashed(String),
}

async fn run_job(worker: usize, queue: &dyn JobQueue, backend: &Arc<dyn ProvingBackend>, job: Job) {
    let id = job.id;
    let kind = job.kind();
    let collection = job.collection();
    let attempt = job.attempts;
    let span = tracing::info_span!("job", worker, job_id = %id, kind = %kind, collection = %collection, attempt);

    let backend = Arc::clone(backend);
    let started = Instant::now();
    let result = tokio::task::spawn_blocking(move || -> Result<ProofArtifact, ProofError> {
        match job.payload {
            JobPayload::Prove { transition } => backend.prove(&transition),
            JobPayload::Merge { left, right } => backend.merge(&left, &right),
        }
    })
    .await;
    let elapsed = started.elapsed();

    let outcome = match result {
        Ok(Ok(artifact)) => Ok(artifact),
        Ok(Err(e)) => Err(Failure::Backend(e)),
        Err(join) => Err(Failure::Crashed(join.to_string())),
    };

    let report = match outcome {
        Ok(artifact) => {
            if kind == frl_queue::JobKind::Prove {
                metrics::histogram!("frl_prove_seconds").record(elapsed.as_secs_f64());
            }
            tracing::info!(
                parent: &span,
                first = artifact.statement.first,
                last = artifact.statement.last,
                elapsed_ms = elapsed.as_millis() as u64,
                "job succeeded"
            );
            queue.complete(id, artifact).await.map(|_| ())
        }
        Err(failure) => {
            let (message, retryable) = match failure {
                Failure::Backend(e) => {
                    let retryable = kind == frl_queue::JobKind::Merge && e.is_retryable();
                    (e.to_string(), retryable)
                }
                Failure::Crashed(msg) => (format!("backend panicked: {msg}"), true),
            };
            tracing::warn!(parent: &span, error = %message, retryable, "job failed");
            queue.fail(id, &message, retryable).await.map(|_| ())
        }
    };
    if let Err(e) = report {
        // The lease will expire and the job will be retried elsewhere.
        tracing::error!(parent: &span, error = %e, "could not report job result");
    }
}
