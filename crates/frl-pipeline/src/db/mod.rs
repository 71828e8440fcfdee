//! # Database Persistence Layer
//!
//! Postgres persistence for the pipeline via SQLx.
//!
//! ## Architecture
//!
//! The database layer is **optional**. When `FRL_DATABASE_URL` is set, job
//! leases and accepted content rows live in Postgres and survive restarts;
//! when absent, the in-memory queue and record store are used (development
//! and tests).
//!
//! ## What is persisted
//!
//! - `content_records`: one row per `(collection, author, content_id)`,
//!   written after the map commit. Replayed by the State Regenerator.
//! - `proof_jobs`: prove and merge jobs, their leases and terminal results.
//!
//! Map roots, staged transitions and pending proofs are not persisted; they
//! are recovered by regeneration.

pub mod jobs;
pub mod records;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::PipelineConfig;

pub use jobs::PgJobQueue;
pub use records::PgRecordStore;

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if no database URL is configured (in-memory mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool(config: &PipelineConfig) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!(
            "FRL_DATABASE_URL not set, running in-memory only mode. \
             Jobs and records will not survive restarts."
        );
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}
