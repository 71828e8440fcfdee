//! # frl CLI entry point
//!
//! Parses command-line arguments and dispatches to subcommand handlers.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use frl_cli::keygen::{run_keygen, KeygenArgs};
use frl_cli::rebuild::{run_rebuild, RebuildArgs};
use frl_cli::worker::{run_worker, WorkerArgs};
use frl_pipeline::PipelineConfig;

/// Feedroll proof pipeline operator CLI.
///
/// Runs proving workers, rebuilds collection roots from durable records and
/// generates author keys. Pipeline settings come from `FRL_*` variables.
#[derive(Parser, Debug)]
#[command(name = "frl", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a proving worker pool against the Postgres job queue.
    Worker(WorkerArgs),

    /// Replay a collection's durable records and print its roots.
    Rebuild(RebuildArgs),

    /// Generate an Ed25519 author key.
    Keygen(KeygenArgs),
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let json = std::env::var("FRL_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Keygen(args) => run_keygen(&args),
        Commands::Worker(args) => match PipelineConfig::from_env() {
            Ok(config) => run_worker(&args, config).await,
            Err(e) => Err(e.into()),
        },
        Commands::Rebuild(args) => match PipelineConfig::from_env() {
            Ok(config) => run_rebuild(&args, &config).await,
            Err(e) => Err(e.into()),
        },
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frl_core::Collection;

    #[test]
    fn cli_parse_worker_flags() {
        let cli = Cli::try_parse_from(["frl", "worker", "--workers", "4", "--metrics-addr", "127.0.0.1:9100"]).unwrap();
        let Commands::Worker(args) = cli.command else { panic!("worker command") };
        assert_eq!(args.workers, Some(4));
        assert_eq!(args.metrics_addr.map(|a| a.port()), Some(9100));
    }

    #[test]
    fn cli_parse_rebuild_collection() {
        let cli = Cli::try_parse_from(["frl", "rebuild", "--collection", "reactions"]).unwrap();
        let Commands::Rebuild(args) = cli.command else { panic!("rebuild command") };
        assert_eq!(args.collection, Collection::Reactions);
    }

    #[test]
    fn cli_rejects_unknown_collection() {
        assert!(Cli::try_parse_from(["frl", "rebuild", "--collection", "likes"]).is_err());
    }

    #[test]
    fn cli_parse_verbosity_is_global() {
        let cli = Cli::try_parse_from(["frl", "keygen", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Keygen(_)));
    }
}
