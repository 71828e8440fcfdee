//! # 32-Byte Digests
//!
//! `Hash` is the unit of everything authenticated in the pipeline: map keys,
//! map values, map roots and proof digests. It serializes as a lowercase hex
//! string so job payloads and database rows stay human-readable.
//!
//! Domain separation is applied at the call site through [`tagged_hash`]:
//! a record digest and a map node can never collide because they carry
//! different tags.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::canonical::CanonicalBytes;
use crate::error::CryptoError;

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The all-zero digest. Used as the empty-leaf marker in sparse maps.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Wrap raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encode a counter value as a map value (big-endian in the low 8 bytes).
    pub fn from_u64(value: u64) -> Self {
        let mut out = [0u8; 32];
        out[24..].copy_from_slice(&value.to_be_bytes());
        Self(out)
    }

    /// Decode a counter value written by [`Hash::from_u64`].
    ///
    /// Returns `None` if any of the upper 24 bytes is non-zero.
    pub fn to_u64(&self) -> Option<u64> {
        if self.0[..24].iter().any(|b| *b != 0) {
            return None;
        }
        let mut be = [0u8; 8];
        be.copy_from_slice(&self.0[24..]);
        Some(u64::from_be_bytes(be))
    }

    /// Whether this is the zero digest.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Bit `index` of the digest, most significant bit of byte 0 first.
    pub fn bit(&self, index: usize) -> bool {
        (self.0[index / 8] >> (7 - (index % 8))) & 1 == 1
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(hex: &str) -> Result<Self, CryptoError> {
        let hex = hex.trim();
        if hex.len() != 64 {
            return Err(CryptoError::DigestError(format!(
                "expected 64 hex chars, got {}",
                hex.len()
            )));
        }
        let mut out = [0u8; 32];
        for (i, slot) in out.iter_mut().enumerate() {
            let pair = hex.get(i * 2..i * 2 + 2).ok_or_else(|| {
                CryptoError::DigestError(format!("non-ascii hex at byte {i}"))
            })?;
            *slot = u8::from_str_radix(pair, 16)
                .map_err(|e| CryptoError::DigestError(format!("invalid hex at byte {i}: {e}")))?;
        }
        Ok(Self(out))
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash({}..)", &self.to_hex()[..12])
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// SHA-256 over a domain tag followed by each part, in order.
pub fn tagged_hash(tag: &[u8], parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(tag);
    for part in parts {
        hasher.update(part);
    }
    Hash(hasher.finalize().into())
}

/// Digest of canonical bytes under a domain tag.
pub fn canonical_digest(tag: &[u8], data: &CanonicalBytes) -> Hash {
    tagged_hash(tag, &[data.as_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_encoding_roundtrips_through_map_value() {
        for v in [0u64, 1, 7, u64::MAX] {
            assert_eq!(Hash::from_u64(v).to_u64(), Some(v));
        }
        assert!(Hash::from_u64(0).is_zero());
    }

    #[test]
    fn non_counter_hash_does_not_decode() {
        let h = tagged_hash(b"x", &[b"y"]);
        assert_eq!(h.to_u64(), None);
    }

    #[test]
    fn bit_order_is_msb_first() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0b1010_0000;
        bytes[31] = 0b0000_0001;
        let h = Hash(bytes);
        assert!(h.bit(0));
        assert!(!h.bit(1));
        assert!(h.bit(2));
        assert!(h.bit(255));
        assert!(!h.bit(254));
    }

    #[test]
    fn tags_separate_domains() {
        assert_ne!(tagged_hash(b"frl/leaf", &[b"k"]), tagged_hash(b"frl/node", &[b"k"]));
    }

    #[test]
    fn hex_serde_is_a_plain_string() {
        let h = tagged_hash(b"frl", &[b"record"]);
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json.len(), 66);
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn malformed_hex_is_rejected() {
        assert!(Hash::from_hex("abcd").is_err());
        assert!(Hash::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn known_sha256_vector() {
        let cb = CanonicalBytes::new(&serde_json::json!({})).unwrap();
        assert_eq!(
            canonical_digest(b"", &cb).to_hex(),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }
}
