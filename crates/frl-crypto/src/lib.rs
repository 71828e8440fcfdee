//! # frl-crypto — Signatures and Authenticated Maps
//!
//! - [`ed25519`]: author key pairs and signature verification against an
//!   author address.
//! - [`smt`]: the 256-level sparse Merkle map that backs both the content
//!   map and the author counter map of every collection.
//!
//! ## Crate Policy
//!
//! - Everything signed goes through `CanonicalBytes`.
//! - Private key material is never serialized or printed.
//! - No `.unwrap()` outside tests.

pub mod ed25519;
pub mod smt;

pub use ed25519::{verify_author, Ed25519KeyPair, Ed25519Signature};
pub use smt::{empty_root, MapWitness, SparseMerkleMap};
