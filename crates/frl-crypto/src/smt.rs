//! # Sparse Merkle Map
//!
//! A fixed-depth (256) binary Merkle tree keyed by 32-byte hashes. Every key
//! has a leaf; absent keys hold the empty leaf, so any map state has a single
//! root regardless of insertion order.
//!
//! ## Hashing
//!
//! - Empty leaf: 32 zero bytes.
//! - Occupied leaf: `SHA256("frl/smt/leaf" || key || value)`.
//! - Node: `SHA256("frl/smt/node" || left || right)`.
//!
//! Key bits are consumed most-significant first: bit 0 of the key picks the
//! child of the root.
//!
//! ## Witnesses
//!
//! A [`MapWitness`] carries the 256 sibling hashes for one key, ordered from
//! the leaf level up to the root's children. From a witness and a candidate
//! value for the key, the root can be recomputed without the rest of the
//! map. This is the only thing a prover needs to check a single-key update.

use std::collections::HashMap;
use std::sync::OnceLock;

use frl_core::{tagged_hash, CryptoError, Hash};
use serde::{Deserialize, Serialize};

/// Tree depth in bits.
pub const DEPTH: usize = 256;

const LEAF_TAG: &[u8] = b"frl/smt/leaf";
const NODE_TAG: &[u8] = b"frl/smt/node";

/// Hash of an occupied leaf.
pub fn leaf_hash(key: &Hash, value: &Hash) -> Hash {
    tagged_hash(LEAF_TAG, &[key.as_bytes(), value.as_bytes()])
}

/// Hash of an interior node.
pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    tagged_hash(NODE_TAG, &[left.as_bytes(), right.as_bytes()])
}

/// Root hashes of empty subtrees, indexed by level (0 = root, 256 = leaf).
fn empty_hashes() -> &'static [Hash; DEPTH + 1] {
    static EMPTY: OnceLock<[Hash; DEPTH + 1]> = OnceLock::new();
    EMPTY.get_or_init(|| {
        let mut table = [Hash::ZERO; DEPTH + 1];
        for level in (0..DEPTH).rev() {
            table[level] = node_hash(&table[level + 1], &table[level + 1]);
        }
        table
    })
}

/// Root of the empty map.
pub fn empty_root() -> Hash {
    empty_hashes()[0]
}

/// Keep the first `bits` bits of `key`, zero the rest.
fn prefix(key: &Hash, bits: usize) -> Hash {
    let mut out = [0u8; 32];
    let full = bits / 8;
    out[..full].copy_from_slice(&key.as_bytes()[..full]);
    let rem = bits % 8;
    if rem != 0 {
        out[full] = key.as_bytes()[full] & (0xffu8 << (8 - rem));
    }
    Hash(out)
}

/// Flip bit `index` (MSB-first).
fn flip(key: &Hash, index: usize) -> Hash {
    let mut out = key.0;
    out[index / 8] ^= 0x80 >> (index % 8);
    Hash(out)
}

/// Fold a leaf hash up to the root along the given sibling path.
fn fold_path(key: &Hash, leaf: Hash, siblings: &[Hash]) -> Hash {
    let mut current = leaf;
    for (i, sibling) in siblings.iter().enumerate() {
        let level = DEPTH - 1 - i;
        current = if key.bit(level) {
            node_hash(sibling, &current)
        } else {
            node_hash(&current, sibling)
        };
    }
    current
}

/// An in-memory sparse Merkle map from `Hash` keys to `Hash` values.
///
/// Only non-empty nodes are stored, keyed by `(level, prefix)`.
#[derive(Debug, Clone, Default)]
pub struct SparseMerkleMap {
    leaves: HashMap<Hash, Hash>,
    nodes: HashMap<(u16, Hash), Hash>,
}

impl SparseMerkleMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current root.
    pub fn root(&self) -> Hash {
        self.node(0, &Hash::ZERO)
    }

    /// Value stored under `key`, if any.
    pub fn get(&self, key: &Hash) -> Option<Hash> {
        self.leaves.get(key).copied()
    }

    /// Number of occupied keys.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether no key is occupied.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Occupied entries, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&Hash, &Hash)> {
        self.leaves.iter()
    }

    /// Set `key` to `value` and return the new root.
    pub fn insert(&mut self, key: Hash, value: Hash) -> Hash {
        self.leaves.insert(key, value);
        self.rehash_path(&key, leaf_hash(&key, &value))
    }

    /// Clear `key` and return the new root.
    pub fn remove(&mut self, key: &Hash) -> Hash {
        self.leaves.remove(key);
        self.rehash_path(key, Hash::ZERO)
    }

    /// Inclusion (or exclusion) witness for `key` against the current root.
    pub fn witness(&self, key: &Hash) -> MapWitness {
        let siblings = (0..DEPTH)
            .rev()
            .map(|level| self.node(level + 1, &prefix(&flip(key, level), level + 1)))
            .collect();
        MapWitness {
            key: *key,
            value: self.get(key),
            siblings,
        }
    }

    fn node(&self, level: usize, prefix_key: &Hash) -> Hash {
        // DEPTH fits in u16.
        self.nodes
            .get(&(level as u16, *prefix_key))
            .copied()
            .unwrap_or(empty_hashes()[level])
    }

    fn set_node(&mut self, level: usize, prefix_key: Hash, hash: Hash) {
        if hash == empty_hashes()[level] {
            self.nodes.remove(&(level as u16, prefix_key));
        } else {
            self.nodes.insert((level as u16, prefix_key), hash);
        }
    }

    fn rehash_path(&mut self, key: &Hash, leaf: Hash) -> Hash {
        let mut current = leaf;
        for level in (0..DEPTH).rev() {
            self.set_node(level + 1, prefix(key, level + 1), current);
            let sibling = self.node(level + 1, &prefix(&flip(key, level), level + 1));
            current = if key.bit(level) {
                node_hash(&sibling, &current)
            } else {
                node_hash(&current, &sibling)
            };
        }
        self.set_node(0, Hash::ZERO, current);
        current
    }
}

/// Authentication path for one key of a [`SparseMerkleMap`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapWitness {
    /// The key this path authenticates.
    pub key: Hash,
    /// The value held under `key` when the witness was taken.
    pub value: Option<Hash>,
    /// Sibling hashes, leaf level first.
    pub siblings: Vec<Hash>,
}

impl MapWitness {
    /// Root the map would have if `key` held `value` and every other key
    /// were unchanged.
    pub fn compute_root(&self, value: Option<&Hash>) -> Result<Hash, CryptoError> {
        if self.siblings.len() != DEPTH {
            return Err(CryptoError::DigestError(format!(
                "witness must carry {DEPTH} siblings, got {}",
                self.siblings.len()
            )));
        }
        let leaf = match value {
            Some(v) => leaf_hash(&self.key, v),
            None => Hash::ZERO,
        };
        Ok(fold_path(&self.key, leaf, &self.siblings))
    }

    /// Whether this witness, with its recorded value, authenticates against `root`.
    pub fn verify(&self, root: &Hash) -> bool {
        matches!(self.compute_root(self.value.as_ref()), Ok(r) if r == *root)
    }
}
