//! # Keygen Subcommand
//!
//! Generates an Ed25519 author key. The seed is printed once; anyone holding
//! it can sign as the author.

use anyhow::Result;
use clap::Args;
use frl_crypto::Ed25519KeyPair;
use serde::Serialize;

/// Arguments for the keygen subcommand.
#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Print only the address, not the seed.
    #[arg(long)]
    pub address_only: bool,
}

/// Key material as printed.
#[derive(Debug, Serialize)]
pub struct GeneratedKey {
    /// Author address (hex public key).
    pub address: String,
    /// Hex seed; omitted with `--address-only`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
}

/// Produce the printable form of `key`.
pub fn describe(key: &Ed25519KeyPair, address_only: bool) -> GeneratedKey {
    GeneratedKey {
        address: key.address().to_string(),
        seed: (!address_only).then(|| key.to_seed().iter().map(|b| format!("{b:02x}")).collect()),
    }
}

/// Execute the keygen subcommand.
pub fn run_keygen(args: &KeygenArgs) -> Result<u8> {
    let key = Ed25519KeyPair::generate();
    let out = describe(&key, args.address_only);
    tracing::info!(address = %out.address, "author key generated");
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(0)
}
