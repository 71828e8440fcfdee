//! # Content Records
//!
//! The signed row behind every content-map entry. A record's position in
//! the content map is derived from `(author, content_id)`; its value is the
//! tagged digest of the full canonical record, signature and block height
//! included.
//!
//! ## Signing
//!
//! The author signs the canonical form of [`SigningPayload`]: collection,
//! author, content id, payload, sequence number and flags. `block_height` is
//! assigned at acceptance and is not signed. Each mutation (create, delete,
//! restore) carries a fresh sequence number and therefore a fresh signature.

use frl_core::{
    canonical_digest, tagged_hash, AuthorAddress, CanonicalBytes, CanonicalizationError,
    Collection, ContentId, CryptoError, Hash,
};
use frl_crypto::{verify_author, Ed25519KeyPair, Ed25519Signature};
use serde::{Deserialize, Serialize};

use crate::lifecycle::ContentFlags;

const RECORD_TAG: &[u8] = b"frl/record/v1";
const CONTENT_KEY_TAG: &[u8] = b"frl/key/content";
const COUNTER_KEY_TAG: &[u8] = b"frl/key/counter";

/// Pointer to another piece of content, used by comments, reactions and reposts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    /// Collection holding the target.
    pub collection: Collection,
    /// Author of the target.
    pub author: AuthorAddress,
    /// Identifier of the target.
    pub content_id: ContentId,
}

/// Collection-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBody {
    /// A top-level post; the body lives in blob storage under `blob_cid`.
    Post {
        /// Content-addressed blob identifier.
        blob_cid: String,
    },
    /// A reply to a post or comment.
    Comment {
        /// What is being replied to.
        target: ContentRef,
        /// Content-addressed blob identifier.
        blob_cid: String,
    },
    /// An emoji reaction.
    Reaction {
        /// What is being reacted to.
        target: ContentRef,
        /// Unicode scalar value of the reaction.
        code_point: u32,
    },
    /// A repost of existing content.
    Repost {
        /// What is being reposted.
        target: ContentRef,
    },
}

impl ContentBody {
    /// The collection this payload belongs to.
    pub fn collection(&self) -> Collection {
        match self {
            Self::Post { .. } => Collection::Posts,
            Self::Comment { .. } => Collection::Comments,
            Self::Reaction { .. } => Collection::Reactions,
            Self::Repost { .. } => Collection::Reposts,
        }
    }
}

/// A signed content record as accepted into a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Author address (hex Ed25519 public key).
    pub author: AuthorAddress,
    /// Identifier, unique per author within the collection.
    pub content_id: ContentId,
    /// Collection-specific payload.
    pub body: ContentBody,
    /// Author's sequence number for this mutation.
    pub author_sequence_number: u64,
    /// Ledger height at acceptance.
    pub block_height: u64,
    /// Deletion history.
    pub flags: ContentFlags,
    /// Signature over [`SigningPayload`].
    pub author_signature: Ed25519Signature,
}

/// The part of a record covered by the author signature.
#[derive(Debug, Serialize)]
pub struct SigningPayload<'a> {
    collection: Collection,
    author: &'a AuthorAddress,
    content_id: &'a ContentId,
    body: &'a ContentBody,
    author_sequence_number: u64,
    is_deleted: bool,
    is_restored: bool,
}

impl ContentRecord {
    /// Build and sign a record with `key`. The author address is taken from the key.
    pub fn sign(
        key: &Ed25519KeyPair,
        content_id: ContentId,
        body: ContentBody,
        author_sequence_number: u64,
        block_height: u64,
        flags: ContentFlags,
    ) -> Result<Self, CanonicalizationError> {
        let author = key.address();
        let payload = CanonicalBytes::new(&SigningPayload {
            collection: body.collection(),
            author: &author,
            content_id: &content_id,
            body: &body,
            author_sequence_number,
            is_deleted: flags.is_deleted,
            is_restored: flags.is_restored,
        })?;
        let author_signature = key.sign(&payload);
        Ok(Self {
            author,
            content_id,
            body,
            author_sequence_number,
            block_height,
            flags,
            author_signature,
        })
    }

    /// Re-sign this record's payload under new flags and sequence number,
    /// as an author does for delete and restore.
    pub fn resign(
        &self,
        key: &Ed25519KeyPair,
        author_sequence_number: u64,
        block_height: u64,
        flags: ContentFlags,
    ) -> Result<Self, CanonicalizationError> {
        Self::sign(
            key,
            self.content_id.clone(),
            self.body.clone(),
            author_sequence_number,
            block_height,
            flags,
        )
    }

    /// Collection the record belongs to.
    pub fn collection(&self) -> Collection {
        self.body.collection()
    }

    /// Canonical bytes the author signed.
    pub fn signing_payload(&self) -> Result<CanonicalBytes, CanonicalizationError> {
        CanonicalBytes::new(&SigningPayload {
            collection: self.collection(),
            author: &self.author,
            content_id: &self.content_id,
            body: &self.body,
            author_sequence_number: self.author_sequence_number,
            is_deleted: self.flags.is_deleted,
            is_restored: self.flags.is_restored,
        })
    }

    /// Check the author signature.
    pub fn verify_signature(&self) -> Result<(), CryptoError> {
        let payload = self
            .signing_payload()
            .map_err(|e| CryptoError::VerificationFailed(e.to_string()))?;
        verify_author(&self.author, &payload, &self.author_signature)
    }

    /// Value stored in the content map for this record.
    pub fn digest(&self) -> Result<Hash, CanonicalizationError> {
        Ok(canonical_digest(RECORD_TAG, &CanonicalBytes::new(self)?))
    }

    /// Content-map key of this record.
    pub fn content_key(&self) -> Hash {
        content_key(&self.author, &self.content_id)
    }
}

/// Content-map key for `(author, content_id)`.
pub fn content_key(author: &AuthorAddress, content_id: &ContentId) -> Hash {
    tagged_hash(
        CONTENT_KEY_TAG,
        &[author.as_str().as_bytes(), content_id.as_str().as_bytes()],
    )
}

/// Counter-map key for an author.
pub fn counter_key(author: &AuthorAddress) -> Hash {
    tagged_hash(COUNTER_KEY_TAG, &[author.as_str().as_bytes()])
}

/// Counter-map value for a sequence number.
pub fn counter_value(sequence: u64) -> Hash {
    Hash::from_u64(sequence)
}
