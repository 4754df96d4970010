//! Authorization transactions and their ledger outcomes.
//!
//! An [`UnsignedAuthorizationTransaction`] grants a scoped access key to the
//! merchant's subscription contract. It is immutable once built and is
//! consumed by exactly one signature request.
//!
//! # Wire Format
//!
//! ```text
//! {
//!   "signer_account": "alice.near",
//!   "receiver_account": "merchant.near",
//!   "action": {
//!     "type": "AddScopedKey",
//!     "public_key": "ed25519:<hex>",
//!     "allowed_contract": "merchant.near",
//!     "allowed_methods": ["chargeSubscription"],
//!     "allowance": "1200"          // or null for an unlimited grant
//!   }
//! }
//! ```

use crate::{AccountId, Amount, PublicKey, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Contract method a subscription key is allowed to call.
pub const CHARGE_METHOD: &str = "chargeSubscription";

/// `error_detail` reported when the subscriber declines or abandons signing.
pub const USER_CANCELLED: &str = "UserCancelled";

/// Domain separation for transaction hashing.
const TRANSACTION_DOMAIN: &[u8] = b"PINGPAY_AUTHORIZATION_V1";

/// Spending ceiling of a scoped key.
///
/// Serialized as the smallest-unit string for `Limited` and `null` for
/// `Unlimited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<Amount>", into = "Option<Amount>")]
pub enum Allowance {
    /// The key may spend at most this much over its lifetime.
    Limited(Amount),
    /// No ceiling. Only produced after an explicit no-limit confirmation.
    Unlimited,
}

impl Allowance {
    /// The ceiling, if any.
    pub fn limit(&self) -> Option<Amount> {
        match self {
            Self::Limited(amount) => Some(*amount),
            Self::Unlimited => None,
        }
    }

    /// Whether this allowance is unbounded.
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }
}

impl From<Option<Amount>> for Allowance {
    fn from(value: Option<Amount>) -> Self {
        match value {
            Some(amount) => Self::Limited(amount),
            None => Self::Unlimited,
        }
    }
}

impl From<Allowance> for Option<Amount> {
    fn from(value: Allowance) -> Self {
        value.limit()
    }
}

impl fmt::Display for Allowance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(amount) => write!(f, "{}", amount),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// The single action carried by an authorization transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthorizationAction {
    /// Add a function-call key restricted to one contract and a method list.
    AddScopedKey {
        public_key: PublicKey,
        allowed_contract: AccountId,
        allowed_methods: Vec<String>,
        allowance: Allowance,
    },
}

impl AuthorizationAction {
    /// Public key being granted.
    pub fn public_key(&self) -> &PublicKey {
        match self {
            Self::AddScopedKey { public_key, .. } => public_key,
        }
    }

    /// Allowance being granted.
    pub fn allowance(&self) -> Allowance {
        match self {
            Self::AddScopedKey { allowance, .. } => *allowance,
        }
    }
}

/// A built but unsigned scoped-key grant.
///
/// Fields are private; the only constructor is [`new`](Self::new), and the
/// value is passed by move into the wallet gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedAuthorizationTransaction {
    signer_account: AccountId,
    receiver_account: AccountId,
    action: AuthorizationAction,
}

impl UnsignedAuthorizationTransaction {
    /// Assemble a transaction. Validation is the builder's job.
    pub fn new(
        signer_account: AccountId,
        receiver_account: AccountId,
        action: AuthorizationAction,
    ) -> Self {
        Self {
            signer_account,
            receiver_account,
            action,
        }
    }

    /// Account whose full-access key signs the grant.
    pub fn signer_account(&self) -> &AccountId {
        &self.signer_account
    }

    /// Merchant account receiving the grant.
    pub fn receiver_account(&self) -> &AccountId {
        &self.receiver_account
    }

    /// The grant.
    pub fn action(&self) -> &AuthorizationAction {
        &self.action
    }

    /// Deterministic bytes the wallet signs.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Payload<'a> {
            domain: &'static [u8],
            signer: &'a str,
            receiver: &'a str,
            public_key: [u8; 32],
            allowed_contract: &'a str,
            allowed_methods: &'a [String],
            allowance: Option<String>,
        }

        let AuthorizationAction::AddScopedKey {
            public_key,
            allowed_contract,
            allowed_methods,
            allowance,
        } = &self.action;

        let payload = Payload {
            domain: TRANSACTION_DOMAIN,
            signer: self.signer_account.as_str(),
            receiver: self.receiver_account.as_str(),
            public_key: public_key.to_bytes(),
            allowed_contract: allowed_contract.as_str(),
            allowed_methods,
            allowance: allowance.limit().map(|a| a.to_string()),
        };
        Ok(postcard::to_allocvec(&payload)?)
    }

    /// Hash identifying this transaction.
    pub fn transaction_id(&self) -> Result<TransactionId> {
        let digest = Sha256::digest(self.signing_bytes()?);
        let mut id = [0u8; 32];
        id.copy_from_slice(&digest);
        Ok(TransactionId::from_hash(id))
    }
}

/// Ledger transaction identifier (hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl TransactionId {
    /// Create from a raw 32-byte hash.
    pub fn from_hash(hash: [u8; 32]) -> Self {
        Self(hex::encode(hash))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal result of one signature request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl TransactionOutcome {
    /// The ledger accepted the transaction.
    pub fn success(transaction_id: TransactionId) -> Self {
        Self {
            succeeded: true,
            transaction_id: Some(transaction_id),
            error_detail: None,
        }
    }

    /// The ledger or wallet failed the transaction.
    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            transaction_id: None,
            error_detail: Some(detail.into()),
        }
    }

    /// The subscriber cancelled before signing.
    pub fn cancelled() -> Self {
        Self::failure(USER_CANCELLED)
    }

    /// Whether this outcome is a user cancellation.
    pub fn is_user_cancelled(&self) -> bool {
        !self.succeeded && self.error_detail.as_deref() == Some(USER_CANCELLED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScopedKeyPair;

    fn sample(allowance: Allowance) -> UnsignedAuthorizationTransaction {
        let merchant = AccountId::new("merchant.near").unwrap();
        UnsignedAuthorizationTransaction::new(
            AccountId::new("alice.near").unwrap(),
            merchant.clone(),
            AuthorizationAction::AddScopedKey {
                public_key: ScopedKeyPair::generate().public_key(),
                allowed_contract: merchant,
                allowed_methods: vec![CHARGE_METHOD.to_string()],
                allowance,
            },
        )
    }

    #[test]
    fn test_allowance_wire_form() {
        let tx = sample(Allowance::Limited(Amount::from_units(1200)));
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["action"]["type"], "AddScopedKey");
        assert_eq!(json["action"]["allowance"], "1200");
        assert_eq!(json["action"]["allowed_methods"][0], CHARGE_METHOD);

        let unlimited = sample(Allowance::Unlimited);
        let json = serde_json::to_value(&unlimited).unwrap();
        assert!(json["action"]["allowance"].is_null());
    }

    #[test]
    fn test_transaction_id_is_deterministic() {
        let tx = sample(Allowance::Limited(Amount::from_units(5)));
        assert_eq!(tx.transaction_id().unwrap(), tx.transaction_id().unwrap());

        let other = sample(Allowance::Limited(Amount::from_units(5)));
        assert_ne!(tx.transaction_id().unwrap(), other.transaction_id().unwrap());
    }

    #[test]
    fn test_outcome_classification() {
        assert!(TransactionOutcome::cancelled().is_user_cancelled());
        assert!(!TransactionOutcome::failure("NotEnoughBalance").is_user_cancelled());
        assert!(!TransactionOutcome::success(TransactionId("ab".into())).is_user_cancelled());
    }
}
