//! AES-256-GCM sealing of escrowed key material.
//!
//! The custody tier never keeps a scoped private key in the clear. Each key
//! is sealed under a per-subscription key derived with HKDF-SHA256 from the
//! custody master key, and the matching public key is bound as associated
//! data so a ciphertext cannot be replayed under another grant.
//!
//! # Wire Format
//!
//! ```text
//! [1 byte version][12 bytes nonce][N bytes ciphertext][16 bytes auth tag]
//! ```

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Current sealing format version.
const SEAL_VERSION: u8 = 1;

/// Size of the nonce in bytes (96 bits for GCM).
const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes.
const TAG_SIZE: usize = 16;

/// HKDF info prefix for per-subscription keys.
const KDF_INFO_PREFIX: &[u8] = b"pingpay-escrow-v1:";

/// Sealing error types.
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("Sealing failed: {0}")]
    SealFailed(String),
    #[error("Unsealing failed: {0}")]
    UnsealFailed(String),
    #[error("Invalid ciphertext format")]
    InvalidFormat,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Result type for sealing operations.
pub type SealResult<T> = Result<T, SealError>;

/// Seals and unseals escrowed secrets under a custody master key.
///
/// # Example
///
/// ```
/// use pingpay_lib::encryption::{generate_master_key, EscrowCipher};
///
/// let cipher = EscrowCipher::new(generate_master_key());
/// let sealed = cipher.seal(b"seed", "sub_1", b"pubkey").unwrap();
/// let opened = cipher.unseal(&sealed, "sub_1", b"pubkey").unwrap();
/// assert_eq!(opened.as_slice(), b"seed");
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EscrowCipher {
    master_key: [u8; 32],
}

impl EscrowCipher {
    /// Create a cipher from a 256-bit master key.
    ///
    /// The master key should come from a secure random source or an HSM and
    /// must never be logged.
    pub fn new(master_key: [u8; 32]) -> Self {
        Self { master_key }
    }

    fn derive_key(&self, subscription_id: &str) -> SealResult<Zeroizing<[u8; 32]>> {
        let hk = Hkdf::<Sha256>::new(None, &self.master_key);
        let mut info = KDF_INFO_PREFIX.to_vec();
        info.extend_from_slice(subscription_id.as_bytes());
        let mut key = Zeroizing::new([0u8; 32]);
        hk.expand(&info, key.as_mut())
            .map_err(|e| SealError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }

    /// Seal `plaintext` for `subscription_id`, binding `associated` (the
    /// public key bytes) as AAD.
    pub fn seal(
        &self,
        plaintext: &[u8],
        subscription_id: &str,
        associated: &[u8],
    ) -> SealResult<Vec<u8>> {
        let key = self.derive_key(subscription_id)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| SealError::SealFailed(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: associated,
                },
            )
            .map_err(|e| SealError::SealFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
        sealed.push(SEAL_VERSION);
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a sealed secret. Fails if the subscription id or associated data
    /// differ from the ones used when sealing.
    pub fn unseal(
        &self,
        sealed: &[u8],
        subscription_id: &str,
        associated: &[u8],
    ) -> SealResult<Zeroizing<Vec<u8>>> {
        if sealed.len() < 1 + NONCE_SIZE + TAG_SIZE {
            return Err(SealError::InvalidFormat);
        }
        if sealed[0] != SEAL_VERSION {
            return Err(SealError::UnsupportedVersion(sealed[0]));
        }

        let nonce = Nonce::from_slice(&sealed[1..1 + NONCE_SIZE]);
        let key = self.derive_key(subscription_id)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| SealError::UnsealFailed(e.to_string()))?;

        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &sealed[1 + NONCE_SIZE..],
                    aad: associated,
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| SealError::UnsealFailed("Authentication failed".to_string()))
    }
}

impl std::fmt::Debug for EscrowCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EscrowCipher([REDACTED])")
    }
}

/// Generate a random 256-bit master key.
pub fn generate_master_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut key);
    key
}
