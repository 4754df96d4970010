//! PingPay ledger primitives.
//!
//! This crate holds everything the subscription issuance protocol needs to
//! talk about the ledger (accounts, amounts, keys, authorization
//! transactions) and the two external collaborators it depends on: the
//! wallet that signs grants and the custody service that escrows scoped keys.
//!
//! # Features
//!
//! - **Scoped keys**: Ed25519 key pairs granted with a contract, method
//!   allow-list and lifetime allowance
//! - **Wallet Signing Gateway**: trait-based, with local, hosted and
//!   selector backends
//! - **Escrow Registration Client**: trait-based, with an HTTPS client
//! - **Local ledger**: an in-process ledger that enforces scoped-key rules
//!
//! # Example
//!
//! ```
//! use pingpay_lib::{AccountId, Allowance, Amount, ScopedKeyPair};
//! use pingpay_lib::transaction::{AuthorizationAction, UnsignedAuthorizationTransaction, CHARGE_METHOD};
//!
//! let merchant: AccountId = "merchant.near".parse().unwrap();
//! let key = ScopedKeyPair::generate();
//! let tx = UnsignedAuthorizationTransaction::new(
//!     "alice.near".parse().unwrap(),
//!     merchant.clone(),
//!     AuthorizationAction::AddScopedKey {
//!         public_key: key.public_key(),
//!         allowed_contract: merchant,
//!         allowed_methods: vec![CHARGE_METHOD.to_string()],
//!         allowance: Allowance::Limited(Amount::from_units(1200)),
//!     },
//! );
//! assert_eq!(tx.action().allowance().limit(), Some(Amount::from_units(1200)));
//! ```

pub mod account;
pub mod amount;
pub mod config;
pub mod encryption;
pub mod errors;
pub mod escrow;
pub mod keys;
pub mod ledger;
pub mod retry;
pub mod transaction;
pub mod wallet;

/// Test doubles for the wallet and escrow collaborators.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use account::AccountId;
pub use amount::Amount;
pub use errors::{PingPayError, PingPayErrorCode};
pub use keys::{PublicKey, ScopedKeyPair, SecretKey};
pub use transaction::{
    Allowance, AuthorizationAction, TransactionId, TransactionOutcome,
    UnsignedAuthorizationTransaction,
};

/// Common result alias for PingPay operations.
pub type Result<T> = std::result::Result<T, PingPayError>;

/// Maximum length of a subscription identifier.
pub const MAX_SUBSCRIPTION_ID_LEN: usize = 128;

/// Identifier of one subscription, shared by the ledger grant, the
/// registration and the escrow record.
///
/// # Example
///
/// ```
/// use pingpay_lib::SubscriptionId;
///
/// let id = SubscriptionId::generate();
/// assert!(id.as_str().starts_with("sub_"));
///
/// assert!(SubscriptionId::new("sub 1").is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Validate and wrap an identifier (`[A-Za-z0-9_-]`, 1..=128 chars).
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_SUBSCRIPTION_ID_LEN {
            return Err(PingPayError::invalid_data(
                "subscription_id",
                format!("length must be 1..={}", MAX_SUBSCRIPTION_ID_LEN),
            ));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(PingPayError::invalid_data(
                "subscription_id",
                format!("invalid character '{}'", c),
            ));
        }
        Ok(Self(id))
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(format!("sub_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SubscriptionId {
    type Err = PingPayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for SubscriptionId {
    type Error = PingPayError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SubscriptionId> for String {
    fn from(id: SubscriptionId) -> Self {
        id.0
    }
}

impl AsRef<str> for SubscriptionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique_and_valid() {
        let a = SubscriptionId::generate();
        let b = SubscriptionId::generate();
        assert_ne!(a, b);
        assert!(SubscriptionId::new(a.as_str()).is_ok());
    }

    #[test]
    fn test_subscription_id_validation() {
        assert!(SubscriptionId::new("sub_1-A").is_ok());
        assert!(SubscriptionId::new("").is_err());
        assert!(SubscriptionId::new("sub/1").is_err());
        assert!(SubscriptionId::new("x".repeat(MAX_SUBSCRIPTION_ID_LEN + 1)).is_err());

        let parsed: std::result::Result<SubscriptionId, _> = serde_json::from_str("\"../etc\"");
        assert!(parsed.is_err());
    }
}
