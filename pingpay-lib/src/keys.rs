//! Ed25519 key material for accounts and scoped access keys.
//!
//! A [`ScopedKeyPair`] is generated fresh for every subscription intent. The
//! public half goes on-ledger as a function-call key; the secret half lives
//! only in memory until it has been deposited with the custody tier.
//!
//! # Security
//!
//! - `SecretKey` is zeroized on drop
//! - `SecretKey` never implements `Serialize` and its `Debug` is redacted
//! - Public keys compare in constant time

use crate::{PingPayError, Result};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Text prefix of an Ed25519 public key.
pub const ED25519_PREFIX: &str = "ed25519:";

/// An Ed25519 public key, rendered as `ed25519:<hex>`.
#[derive(Clone, Copy, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Verify an Ed25519 signature made by the matching secret key.
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(signature);
        key.verify(message, &sig).is_ok()
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", ED25519_PREFIX, hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

impl FromStr for PublicKey {
    type Err = PingPayError;

    fn from_str(s: &str) -> Result<Self> {
        let encoded = s.strip_prefix(ED25519_PREFIX).ok_or_else(|| {
            PingPayError::invalid_data("public_key", format!("missing '{}' prefix", ED25519_PREFIX))
        })?;
        let bytes = hex::decode(encoded)
            .map_err(|e| PingPayError::invalid_data("public_key", e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PingPayError::invalid_data("public_key", "expected 32 bytes"))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for PublicKey {
    type Error = PingPayError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.to_string()
    }
}

/// Ed25519 secret key (a scoped key or an account's full-access key).
///
/// Not `Clone` or `Serialize`. The only ways out are
/// [`expose_bytes`](Self::expose_bytes) for the custody deposit and
/// [`sign`](Self::sign).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Rebuild a secret key from raw seed bytes (custody side).
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a hex encoded seed.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let mut bytes = hex::decode(encoded)
            .map_err(|e| PingPayError::invalid_data("private_key", e.to_string()))?;
        if bytes.len() != 32 {
            bytes.zeroize();
            return Err(PingPayError::invalid_data("private_key", "expected 32 bytes"));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self(seed))
    }

    /// Raw seed bytes. Callers must not persist these.
    pub fn expose_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex encoding of the seed, for the custody wire format.
    pub fn expose_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Public key derived from this secret.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(SigningKey::from_bytes(&self.0).verifying_key().to_bytes())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        SigningKey::from_bytes(&self.0).sign(message).to_bytes()
    }

    /// Copy the secret so a test fixture can sign as the subscriber.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn duplicate(&self) -> Self {
        Self(self.0)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// A freshly generated function-call key pair.
pub struct ScopedKeyPair {
    public_key: PublicKey,
    secret_key: SecretKey,
}

impl ScopedKeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let mut seed = rand::random::<[u8; 32]>();
        let secret_key = SecretKey::from_bytes(seed);
        seed.zeroize();
        Self {
            public_key: secret_key.public_key(),
            secret_key,
        }
    }

    /// Rebuild a key pair from an existing secret.
    pub fn from_secret(secret_key: SecretKey) -> Self {
        Self {
            public_key: secret_key.public_key(),
            secret_key,
        }
    }

    /// The public key.
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// The secret key.
    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    /// Consume the pair and keep only the secret.
    pub fn into_secret(self) -> SecretKey {
        self.secret_key
    }
}

impl fmt::Debug for ScopedKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedKeyPair")
            .field("public_key", &self.public_key)
            .field("secret_key", &self.secret_key)
            .finish()
    }
}
