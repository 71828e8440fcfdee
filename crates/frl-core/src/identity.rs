//! # Identifier Newtypes
//!
//! Author addresses, content identifiers, job identifiers and collection
//! names are distinct types so a content id can never be passed where an
//! author address is expected. Constructors validate their input; the inner
//! values are reachable only through accessors.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdentifierError;

/// Maximum accepted length of a content identifier.
pub const MAX_CONTENT_ID_LEN: usize = 128;

/// One of the four independently versioned content collections.
///
/// Each collection owns its own content map, counter map, job stream and
/// aggregate proof. Nothing is ordered across collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    /// Top-level posts.
    Posts,
    /// Comments on a post or another comment.
    Comments,
    /// Reactions to a post, comment or repost.
    Reactions,
    /// Reposts of existing content.
    Reposts,
}

impl Collection {
    /// Every collection, in a fixed order.
    pub const ALL: [Collection; 4] = [
        Collection::Posts,
        Collection::Comments,
        Collection::Reactions,
        Collection::Reposts,
    ];

    /// Lowercase name, as stored in the database and job payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::Comments => "comments",
            Self::Reactions => "reactions",
            Self::Reposts => "reposts",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Collection {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "posts" => Ok(Self::Posts),
            "comments" => Ok(Self::Comments),
            "reactions" => Ok(Self::Reactions),
            "reposts" => Ok(Self::Reposts),
            other => Err(IdentifierError::UnknownCollection(other.to_string())),
        }
    }
}

/// An author's address: the lowercase hex encoding of their Ed25519 public key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AuthorAddress(String);

impl AuthorAddress {
    /// Validate and normalize an address.
    pub fn new(address: impl Into<String>) -> Result<Self, IdentifierError> {
        let address = address.into().trim().to_ascii_lowercase();
        if address.len() != 64 || !address.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(IdentifierError::InvalidAuthorAddress(address));
        }
        Ok(Self(address))
    }

    /// Address for a raw 32-byte public key.
    pub fn from_public_key(key: &[u8; 32]) -> Self {
        Self(key.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// The normalized hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AuthorAddress {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AuthorAddress> for String {
    fn from(value: AuthorAddress) -> Self {
        value.0
    }
}

impl std::fmt::Display for AuthorAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A content-addressed identifier, unique per `(author, collection)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    /// Validate a content identifier.
    ///
    /// Accepts 1..=128 characters drawn from ASCII alphanumerics, `-`, `_`
    /// and `.`, which covers base32/base58 CIDs and slug-style ids.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentifierError> {
        let id = id.into();
        let valid_chars = id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
        if id.is_empty() || id.len() > MAX_CONTENT_ID_LEN || !valid_chars {
            return Err(IdentifierError::InvalidContentId(id));
        }
        Ok(Self(id))
    }

    /// The identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContentId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContentId> for String {
    fn from(value: ContentId) -> Self {
        value.0
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a prove or merge job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a fresh random job id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
