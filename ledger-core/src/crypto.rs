//! Cryptographic operations for the ledger
//!
//! This module provides:
//! - The SHA-256 hashing primitive and the [`Digest`] type every record,
//!   link and Merkle node is expressed in
//! - The fixed sentinels baked into the hash space
//! - Ed25519 key pair generation, signing, and verification for daily anchors

use crate::{Error, Result};
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// Predecessor digest of the first record in the chain (32 zero bytes).
pub const GENESIS_SENTINEL: Digest = Digest([0u8; 32]);

/// Preimage of the Merkle root of an empty batch.
pub const EMPTY_BATCH_PREIMAGE: &[u8] = b"empty";

/// 32-byte SHA-256 digest, rendered and serialized as lowercase hex
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(#[serde(with = "hex_bytes")] [u8; 32]);

impl Digest {
    /// Wrap raw digest bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering (64 characters)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| Error::Validation(format!("Invalid digest hex: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Validation("Digest must be 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }

    /// Whether this is the genesis sentinel
    pub fn is_genesis(&self) -> bool {
        *self == GENESIS_SENTINEL
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Digest(hasher.finalize().into())
}

/// Merkle root of an empty batch: `SHA-256("empty")`
pub fn empty_batch_root() -> Digest {
    hash_bytes(EMPTY_BATCH_PREIMAGE)
}

/// Ed25519 signature (64 bytes), serialized as hex
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(#[serde(with = "hex_bytes")] [u8; 64]);

impl Signature {
    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

/// Ed25519 key pair for signing anchors
#[derive(Debug)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_seed(&rand::random::<[u8; 32]>())
    }

    /// Create from seed (32 bytes) - deterministic generation
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Get public key bytes
    pub fn public_key(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }

    /// Verify a signature
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        let dalek_sig = DalekSignature::from_bytes(signature.as_bytes());
        self.verifying_key
            .verify(message, &dalek_sig)
            .map_err(|e| Error::Signature(format!("Verification failed: {}", e)))
    }
}

/// Verify a signature with a public key
pub fn verify_signature(message: &[u8], signature: &Signature, public_key: &[u8; 32]) -> bool {
    let dalek_sig = DalekSignature::from_bytes(signature.as_bytes());

    let verifying_key = match VerifyingKey::from_bytes(public_key) {
        Ok(key) => key,
        Err(_) => return false,
    };

    verifying_key.verify(message, &dalek_sig).is_ok()
}

/// Hex (de)serialization for fixed-size byte arrays
mod hex_bytes {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom(format!("expected {} bytes", N)))
    }
}
