//! # Transition Descriptor
//!
//! What a prove job carries: the before/after roots of both maps of one
//! collection, the record before and after, and the witnesses that let a
//! prover recompute every root from the key alone.

use frl_core::{Collection, Hash};
use frl_crypto::MapWitness;
use serde::{Deserialize, Serialize};

use crate::lifecycle::TransitionKind;
use crate::record::ContentRecord;

/// Content and counter roots of one collection, taken together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapRoots {
    /// Content map root.
    pub content: Hash,
    /// Author counter map root.
    pub counter: Hash,
}

impl std::fmt::Display for MapRoots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "content={} counter={}", self.content, self.counter)
    }
}

/// A claimed single-record state change over both maps of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDescriptor {
    /// Collection the transition mutates.
    pub collection: Collection,
    /// Position in the collection's submission order.
    pub index: u64,
    /// Create, delete or restore.
    pub kind: TransitionKind,
    /// Counter root before.
    pub initial_counter_root: Hash,
    /// Counter root after.
    pub latest_counter_root: Hash,
    /// Content root before.
    pub initial_content_root: Hash,
    /// Content root after.
    pub latest_content_root: Hash,
    /// Stored record before the transition, absent for a create.
    pub record_before: Option<ContentRecord>,
    /// Record after the transition.
    pub record_after: ContentRecord,
    /// Path for the author's counter key, taken against the initial counter root.
    pub counter_witness: MapWitness,
    /// Path for the record's content key, taken against the initial content root.
    pub content_witness: MapWitness,
}

impl TransitionDescriptor {
    /// Roots the transition starts from.
    pub fn initial_roots(&self) -> MapRoots {
        MapRoots {
            content: self.initial_content_root,
            counter: self.initial_counter_root,
        }
    }

    /// Roots the transition claims to produce.
    pub fn latest_roots(&self) -> MapRoots {
        MapRoots {
            content: self.latest_content_root,
            counter: self.latest_counter_root,
        }
    }
}
