//! # Rebuild Subcommand
//!
//! Replays a collection's durable records through the State Regenerator and
//! prints the resulting roots. Read-only: nothing is written back.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use frl_core::Collection;
use frl_pipeline::{init_pool, PgRecordStore, PipelineConfig};
use frl_state::{MapRoots, StateRegenerator};
use serde::Serialize;

/// Arguments for the rebuild subcommand.
#[derive(Args, Debug)]
pub struct RebuildArgs {
    /// Collection to rebuild: posts, comments, reactions or reposts.
    #[arg(long)]
    pub collection: Collection,
}

/// Rebuild result as printed.
#[derive(Debug, Serialize)]
pub struct RebuildReport {
    /// Collection rebuilt.
    pub collection: Collection,
    /// Replayed roots.
    pub roots: MapRoots,
}

/// Execute the rebuild subcommand.
pub async fn run_rebuild(args: &RebuildArgs, config: &PipelineConfig) -> Result<u8> {
    let Some(pool) = init_pool(config).await.context("database initialization failed")? else {
        bail!("FRL_DATABASE_URL must be set to rebuild from durable records");
    };
    let regenerator = StateRegenerator::new(Arc::new(PgRecordStore::new(pool)));
    let roots = regenerator
        .rebuild(args.collection)
        .await
        .with_context(|| format!("rebuilding {}", args.collection))?;
    let report = RebuildReport {
        collection: args.collection,
        roots,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(0)
}
