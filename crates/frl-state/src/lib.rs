//! # frl-state — Authenticated Collection State
//!
//! Everything that decides whether a content mutation is valid and what it
//! does to a collection's roots.
//!
//! - **Records** (`record.rs`): the signed `ContentRecord` and its map keys.
//! - **Lifecycle** (`lifecycle.rs`): create / delete / restore flag rules.
//! - **Map store** (`store.rs`): content and counter maps of one collection,
//!   mutated only by applying a proven transition or by replay.
//! - **Transitions** (`transition.rs`, `builder.rs`): descriptors with
//!   witnesses, built against a snapshot of the store.
//! - **Persistence and replay** (`record_store.rs`, `regenerator.rs`).
//!
//! ## Concurrency
//!
//! Nothing here locks. A store is owned by exactly one writer per
//! collection; callers serialize `build` and `apply` themselves.

pub mod builder;
pub mod lifecycle;
pub mod record;
pub mod record_store;
pub mod regenerator;
pub mod store;
pub mod transition;

pub use builder::{MutationRequest, TransitionBuilder};
pub use lifecycle::{ContentFlags, TransitionKind};
pub use record::{content_key, counter_key, counter_value, ContentBody, ContentRecord, ContentRef};
pub use record_store::{acceptance_order, InMemoryRecordStore, RecordStore};
pub use regenerator::StateRegenerator;
pub use store::AuthenticatedMapStore;
pub use transition::{MapRoots, TransitionDescriptor};
