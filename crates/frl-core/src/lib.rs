//! # frl-core — Foundational Types for the Proof Pipeline
//!
//! Every other crate in the workspace depends on `frl-core`; it depends on
//! nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `AuthorAddress`, `ContentId`,
//!    `JobId` are validated newtypes; `Collection` is a closed enum.
//!
//! 2. **`CanonicalBytes` for everything hashed or signed.** Record digests,
//!    author signatures and proof statements all go through JCS
//!    canonicalization first.
//!
//! 3. **One 32-byte `Hash`.** Map keys, map values, roots and proof digests
//!    share a single type with hex serde.
//!
//! 4. **A closed error taxonomy.** `FrlError` separates semantic conflicts,
//!    proving failures, transient infrastructure faults and divergence.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `frl-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod canonical;
pub mod digest;
pub mod error;
pub mod identity;

pub use canonical::CanonicalBytes;
pub use digest::{canonical_digest, tagged_hash, Hash};
pub use error::{CanonicalizationError, ConflictError, CryptoError, FrlError, IdentifierError};
pub use identity::{AuthorAddress, Collection, ContentId, JobId};
