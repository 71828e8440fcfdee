//! # Author Signatures (Ed25519)
//!
//! An author's address is the hex encoding of their Ed25519 public key, so a
//! signature can be checked from the record alone without a key registry.
//!
//! ## Security Invariant
//!
//! - Signing and verification take `&CanonicalBytes`; a raw byte slice
//!   cannot be signed.
//! - `Ed25519KeyPair` does not implement `Serialize`, and its `Debug` output
//!   never contains key material.

use ed25519_dalek::{Signer, Verifier};
use frl_core::{AuthorAddress, CanonicalBytes, CryptoError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A 64-byte Ed25519 signature, serialized as 128 hex characters.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Ed25519Signature(pub [u8; 64]);

impl Ed25519Signature {
    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse 128 hex characters.
    pub fn from_hex(hex: &str) -> Result<Self, CryptoError> {
        let bytes = decode_hex(hex.trim())?;
        let arr: [u8; 64] = bytes.try_into().map_err(|v: Vec<u8>| {
            CryptoError::VerificationFailed(format!("signature must be 64 bytes, got {}", v.len()))
        })?;
        Ok(Self(arr))
    }
}

impl Serialize for Ed25519Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Ed25519Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519Signature({}..)", &self.to_hex()[..8])
    }
}

/// An author's signing key.
pub struct Ed25519KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl Ed25519KeyPair {
    /// Generate a fresh key from the OS RNG.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Deterministic key from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }

    /// The 32-byte seed. Handle as a secret.
    pub fn to_seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// The author address derived from this key.
    pub fn address(&self) -> AuthorAddress {
        AuthorAddress::from_public_key(&self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a canonical payload.
    pub fn sign(&self, payload: &CanonicalBytes) -> Ed25519Signature {
        Ed25519Signature(self.signing_key.sign(payload.as_bytes()).to_bytes())
    }
}

impl std::fmt::Debug for Ed25519KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519KeyPair(<private>)")
    }
}

/// Recover the verifying key encoded in an author address.
pub fn verifying_key(address: &AuthorAddress) -> Result<ed25519_dalek::VerifyingKey, CryptoError> {
    let bytes = decode_hex(address.as_str())?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::KeyError("address must encode 32 bytes".to_string()))?;
    ed25519_dalek::VerifyingKey::from_bytes(&arr)
        .map_err(|e| CryptoError::KeyError(format!("address is not a valid ed25519 point: {e}")))
}

/// Verify that `address` signed `payload`.
pub fn verify_author(
    address: &AuthorAddress,
    payload: &CanonicalBytes,
    signature: &Ed25519Signature,
) -> Result<(), CryptoError> {
    let vk = verifying_key(address)?;
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    vk.verify(payload.as_bytes(), &sig)
        .map_err(|e| CryptoError::VerificationFailed(format!("author {address}: {e}")))
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, CryptoError> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err(CryptoError::KeyError("hex must be ascii with even length".to_string()));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| CryptoError::KeyError(format!("invalid hex at {i}: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(v: serde_json::Value) -> CanonicalBytes {
        CanonicalBytes::new(&v).unwrap()
    }

    #[test]
    fn author_signature_verifies_against_address() {
        let kp = Ed25519KeyPair::from_seed(&[7u8; 32]);
        let msg = payload(serde_json::json!({"content_id": "c1", "seq": 1}));
        let sig = kp.sign(&msg);
        verify_author(&kp.address(), &msg, &sig).expect("own signature verifies");
    }

    #[test]
    fn signature_from_other_author_is_rejected() {
        let alice = Ed25519KeyPair::from_seed(&[1u8; 32]);
        let bob = Ed25519KeyPair::from_seed(&[2u8; 32]);
        let msg = payload(serde_json::json!({"content_id": "c1"}));
        let sig = alice.sign(&msg);
        assert!(matches!(
            verify_author(&bob.address(), &msg, &sig),
            Err(CryptoError::VerificationFailed(_))
        ));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let kp = Ed25519KeyPair::generate();
        let sig = kp.sign(&payload(serde_json::json!({"is_deleted": false})));
        let tampered = payload(serde_json::json!({"is_deleted": true}));
        assert!(verify_author(&kp.address(), &tampered, &sig).is_err());
    }

    #[test]
    fn seeded_keys_are_deterministic() {
        let a = Ed25519KeyPair::from_seed(&[42u8; 32]);
        let b = Ed25519KeyPair::from_seed(&[42u8; 32]);
        assert_eq!(a.address(), b.address());
        let msg = payload(serde_json::json!({"x": 1}));
        assert_eq!(a.sign(&msg), b.sign(&msg));
        assert_eq!(a.to_seed(), [42u8; 32]);
    }

    #[test]
    fn signature_hex_serde() {
        let kp = Ed25519KeyPair::generate();
        let sig = kp.sign(&payload(serde_json::json!({"y": 2})));
        let json = serde_json::to_string(&sig).unwrap();
        assert_eq!(json.len(), 128 + 2);
        let back: Ed25519Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
        assert!(Ed25519Signature::from_hex("abcd").is_err());
    }

    #[test]
    fn debug_hides_private_key() {
        let kp = Ed25519KeyPair::generate();
        assert_eq!(format!("{kp:?}"), "Ed25519KeyPair(<private>)");
    }
}
