//! # Worker Subcommand
//!
//! Runs a proving worker pool against the Postgres job queue until Ctrl-C.
//! Any number of worker processes may share one database; `SKIP LOCKED`
//! claims keep them from taking the same job.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use frl_pipeline::{init_pool, PgJobQueue, PipelineConfig, WorkerPool};
use frl_zkp::MockProvingBackend;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Arguments for the worker subcommand.
#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Number of workers; overrides `FRL_WORKER_COUNT`.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Serve Prometheus metrics on this address (e.g. 0.0.0.0:9100).
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

/// Execute the worker subcommand.
pub async fn run_worker(args: &WorkerArgs, mut config: PipelineConfig) -> Result<u8> {
    if let Some(n) = args.workers {
        if n == 0 {
            bail!("--workers must be at least 1");
        }
        config.worker_count = n;
    }
    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        tracing::info!(%addr, "metrics exporter listening");
    }

    let Some(pool) = init_pool(&config).await.context("database initialization failed")? else {
        bail!("FRL_DATABASE_URL must be set to run workers");
    };
    let queue = Arc::new(PgJobQueue::new(
        pool,
        config.lock_duration,
        config.claim_poll_interval,
    ));
    tracing::info!(?config, "starting worker pool");
    let pool = WorkerPool::start(queue, Arc::new(MockProvingBackend::new()), config.worker_count)
        .await
        .context("worker pool failed to start")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested; waiting for running jobs");
    pool.shutdown().await;
    Ok(0)
}
