//! In-process ledger simulation.
//!
//! `LocalLedger` holds accounts, their full-access keys and the scoped
//! function-call keys granted by authorization transactions. It enforces the
//! same rules a real chain would apply to a scoped key: the charge must be
//! signed by the key, target the allowed contract and method, carry a fresh
//! nonce, and stay within the remaining allowance.
//!
//! # Thread Safety
//!
//! State lives behind a `RwLock`. A poisoned lock is recovered rather than
//! propagated since every mutation is applied atomically under one guard.

use crate::transaction::{AuthorizationAction, UnsignedAuthorizationTransaction};
use crate::{AccountId, Allowance, Amount, PingPayError, PublicKey, Result, SubscriptionId};
use crate::TransactionId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Domain separation for scoped charge signatures.
const CHARGE_DOMAIN: &[u8] = b"PINGPAY_CHARGE_V1";

/// A scoped key as recorded on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKeyGrant {
    /// Contract the key may call.
    pub receiver: AccountId,
    /// Methods the key may call.
    pub methods: Vec<String>,
    /// Lifetime spending ceiling.
    pub allowance: Allowance,
    /// Total spent so far.
    pub spent: Amount,
    /// Highest nonce used by this key.
    pub nonce: u64,
}

impl AccessKeyGrant {
    /// Remaining allowance, `None` when unlimited.
    pub fn remaining(&self) -> Option<Amount> {
        self.allowance
            .limit()
            .map(|limit| limit.checked_sub(&self.spent).unwrap_or_else(Amount::zero))
    }
}

/// A charge executed with a scoped key on behalf of the subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedCharge {
    /// Account that owns the scoped key (the subscriber).
    pub signer_account: AccountId,
    /// Scoped key signing the charge.
    pub public_key: PublicKey,
    /// Contract being called (the merchant).
    pub receiver_account: AccountId,
    /// Method being called.
    pub method: String,
    /// Amount moved from subscriber to merchant.
    pub amount: Amount,
    /// Strictly increasing per key.
    pub nonce: u64,
    /// Subscription the charge belongs to.
    pub subscription_id: SubscriptionId,
}

impl ScopedCharge {
    /// Deterministic bytes signed by the scoped key.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Payload<'a> {
            domain: &'static [u8],
            signer: &'a str,
            public_key: [u8; 32],
            receiver: &'a str,
            method: &'a str,
            amount: String,
            nonce: u64,
            subscription_id: &'a str,
        }

        let payload = Payload {
            domain: CHARGE_DOMAIN,
            signer: self.signer_account.as_str(),
            public_key: self.public_key.to_bytes(),
            receiver: self.receiver_account.as_str(),
            method: &self.method,
            amount: self.amount.to_string(),
            nonce: self.nonce,
            subscription_id: self.subscription_id.as_str(),
        };
        Ok(postcard::to_allocvec(&payload)?)
    }
}

/// Anything that can execute a signed scoped charge.
#[async_trait]
pub trait ChargeSubmitter: Send + Sync {
    /// Submit a charge signed by its scoped key.
    async fn submit_charge(&self, charge: &ScopedCharge, signature: &[u8; 64])
        -> Result<TransactionId>;

    /// Whether `account` exists on the ledger charges are submitted to.
    async fn account_exists(&self, account: &AccountId) -> Result<bool>;
}

#[derive(Debug)]
struct AccountState {
    full_access_key: PublicKey,
    balance: Amount,
    access_keys: HashMap<PublicKey, AccessKeyGrant>,
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<AccountId, AccountState>,
    applied: HashSet<TransactionId>,
}

/// In-memory ledger.
#[derive(Debug, Default)]
pub struct LocalLedger {
    state: RwLock<LedgerState>,
}

impl LocalLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an account controlled by `full_access_key`.
    pub fn create_account(
        &self,
        account: AccountId,
        full_access_key: PublicKey,
        balance: Amount,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.accounts.contains_key(&account) {
            return Err(PingPayError::LedgerRejected(format!(
                "account {} already exists",
                account
            )));
        }
        state.accounts.insert(
            account,
            AccountState {
                full_access_key,
                balance,
                access_keys: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Whether an account exists.
    pub fn has_account(&self, account: &AccountId) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.accounts.contains_key(account)
    }

    /// Current balance of an account.
    pub fn balance(&self, account: &AccountId) -> Result<Amount> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .accounts
            .get(account)
            .map(|a| a.balance)
            .ok_or_else(|| PingPayError::not_found("account", account.as_str()))
    }

    /// Look up a scoped key on an account.
    pub fn access_key(&self, account: &AccountId, public_key: &PublicKey) -> Option<AccessKeyGrant> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .accounts
            .get(account)
            .and_then(|a| a.access_keys.get(public_key))
            .cloned()
    }

    /// Number of scoped keys on an account.
    pub fn access_key_count(&self, account: &AccountId) -> usize {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .accounts
            .get(account)
            .map(|a| a.access_keys.len())
            .unwrap_or(0)
    }

    /// Apply a signed authorization transaction.
    ///
    /// The signature must be made by the signer's full-access key over
    /// [`UnsignedAuthorizationTransaction::signing_bytes`].
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, tx, signature), fields(signer = %tx.signer_account())))]
    pub fn submit_authorization(
        &self,
        tx: &UnsignedAuthorizationTransaction,
        signature: &[u8; 64],
    ) -> Result<TransactionId> {
        let message = tx.signing_bytes()?;
        let tx_id = tx.transaction_id()?;

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.applied.contains(&tx_id) {
            return Err(PingPayError::LedgerRejected(format!(
                "transaction {} already applied",
                tx_id
            )));
        }
        if !state.accounts.contains_key(tx.receiver_account()) {
            return Err(PingPayError::not_found(
                "account",
                tx.receiver_account().as_str(),
            ));
        }

        let account = state
            .accounts
            .get_mut(tx.signer_account())
            .ok_or_else(|| PingPayError::not_found("account", tx.signer_account().as_str()))?;
        if !account.full_access_key.verify(&message, signature) {
            return Err(PingPayError::Auth(
                "signature does not match the full-access key".to_string(),
            ));
        }

        let AuthorizationAction::AddScopedKey {
            public_key,
            allowed_contract,
            allowed_methods,
            allowance,
        } = tx.action();

        if allowed_contract != tx.receiver_account() {
            return Err(PingPayError::ValidationFailed(
                "scoped key contract must be the transaction receiver".to_string(),
            ));
        }
        if account.access_keys.contains_key(public_key) || *public_key == account.full_access_key {
            return Err(PingPayError::LedgerRejected(format!(
                "access key {} already exists",
                public_key
            )));
        }

        account.access_keys.insert(
            *public_key,
            AccessKeyGrant {
                receiver: allowed_contract.clone(),
                methods: allowed_methods.clone(),
                allowance: *allowance,
                spent: Amount::zero(),
                nonce: 0,
            },
        );
        state.applied.insert(tx_id.clone());

        #[cfg(feature = "tracing")]
        tracing::info!(%tx_id, public_key = %public_key, allowance = %allowance, "scoped key added");
        Ok(tx_id)
    }

    /// Execute a charge signed by a scoped key.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, charge, signature), fields(subscription = %charge.subscription_id, amount = %charge.amount)))]
    pub fn charge(&self, charge: &ScopedCharge, signature: &[u8; 64]) -> Result<TransactionId> {
        let message = charge.signing_bytes()?;
        if !charge.public_key.verify(&message, signature) {
            return Err(PingPayError::Auth(
                "charge is not signed by the scoped key".to_string(),
            ));
        }
        if !charge.amount.is_positive() {
            return Err(PingPayError::invalid_data("amount", "charge must be positive"));
        }

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if !state.accounts.contains_key(&charge.receiver_account) {
            return Err(PingPayError::not_found(
                "account",
                charge.receiver_account.as_str(),
            ));
        }

        let payer = state
            .accounts
            .get_mut(&charge.signer_account)
            .ok_or_else(|| PingPayError::not_found("account", charge.signer_account.as_str()))?;
        let grant = payer
            .access_keys
            .get(&charge.public_key)
            .ok_or_else(|| PingPayError::not_found("access key", charge.public_key.to_string()))?;

        if grant.receiver != charge.receiver_account {
            return Err(PingPayError::PermissionDenied(format!(
                "key is scoped to {}, not {}",
                grant.receiver, charge.receiver_account
            )));
        }
        if !grant.methods.iter().any(|m| *m == charge.method) {
            return Err(PingPayError::PermissionDenied(format!(
                "method {} is not allowed",
                charge.method
            )));
        }
        if charge.nonce <= grant.nonce {
            return Err(PingPayError::StaleNonce {
                nonce: charge.nonce,
                last: grant.nonce,
            });
        }
        let new_spent = grant
            .spent
            .checked_add(&charge.amount)
            .ok_or_else(|| PingPayError::Overflow("spent allowance".to_string()))?;
        if let Some(remaining) = grant.remaining() {
            if !charge.amount.is_within_limit(&remaining) {
                return Err(PingPayError::AllowanceExceeded {
                    requested: charge.amount.to_string(),
                    remaining: remaining.to_string(),
                });
            }
        }
        let new_balance = payer.balance.checked_sub(&charge.amount).ok_or_else(|| {
            PingPayError::LedgerRejected(format!("{} has insufficient balance", charge.signer_account))
        })?;

        payer.balance = new_balance;
        if let Some(grant) = payer.access_keys.get_mut(&charge.public_key) {
            grant.spent = new_spent;
            grant.nonce = charge.nonce;
        }

        let receiver = state
            .accounts
            .get_mut(&charge.receiver_account)
            .ok_or_else(|| PingPayError::not_found("account", charge.receiver_account.as_str()))?;
        receiver.balance = receiver
            .balance
            .checked_add(&charge.amount)
            .ok_or_else(|| PingPayError::Overflow("receiver balance".to_string()))?;

        let mut id = [0u8; 32];
        id.copy_from_slice(&Sha256::digest(&message));
        let tx_id = TransactionId::from_hash(id);
        state.applied.insert(tx_id.clone());
        Ok(tx_id)
    }
}

#[async_trait]
impl ChargeSubmitter for LocalLedger {
    async fn submit_charge(
        &self,
        charge: &ScopedCharge,
        signature: &[u8; 64],
    ) -> Result<TransactionId> {
        self.charge(charge, signature)
    }

    async fn account_exists(&self, account: &AccountId) -> Result<bool> {
        Ok(self.has_account(account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::CHARGE_METHOD;
    use crate::ScopedKeyPair;

    struct Fixture {
        ledger: LocalLedger,
        alice: AccountId,
        merchant: AccountId,
        alice_key: ScopedKeyPair,
    }

    fn fixture() -> Fixture {
        let ledger = LocalLedger::new();
        let alice = AccountId::new("alice.near").unwrap();
        let merchant = AccountId::new("merchant.near").unwrap();
        let alice_key = ScopedKeyPair::generate();
        ledger
            .create_account(alice.clone(), alice_key.public_key(), Amount::from_units(10_000))
            .unwrap();
        ledger
            .create_account(
                merchant.clone(),
                ScopedKeyPair::generate().public_key(),
                Amount::zero(),
            )
            .unwrap();
        Fixture {
            ledger,
            alice,
            merchant,
            alice_key,
        }
    }

    fn grant(f: &Fixture, allowance: Allowance) -> ScopedKeyPair {
        let scoped = ScopedKeyPair::generate();
        let tx = UnsignedAuthorizationTransaction::new(
            f.alice.clone(),
            f.merchant.clone(),
            AuthorizationAction::AddScopedKey {
                public_key: scoped.public_key(),
                allowed_contract: f.merchant.clone(),
                allowed_methods: vec![CHARGE_METHOD.to_string()],
                allowance,
            },
        );
        let sig = f.alice_key.secret_key().sign(&tx.signing_bytes().unwrap());
        f.ledger.submit_authorization(&tx, &sig).unwrap();
        scoped
    }

    fn charge(f: &Fixture, key: &ScopedKeyPair, amount: u64, nonce: u64) -> Result<TransactionId> {
        let charge = ScopedCharge {
            signer_account: f.alice.clone(),
            public_key: key.public_key(),
            receiver_account: f.merchant.clone(),
            method: CHARGE_METHOD.to_string(),
            amount: Amount::from_units(amount),
            nonce,
            subscription_id: SubscriptionId::new("sub_test").unwrap(),
        };
        let sig = key.secret_key().sign(&charge.signing_bytes().unwrap());
        f.ledger.charge(&charge, &sig)
    }

    #[test]
    fn test_authorization_requires_full_access_signature() {
        let f = fixture();
        let scoped = ScopedKeyPair::generate();
        let tx = UnsignedAuthorizationTransaction::new(
            f.alice.clone(),
            f.merchant.clone(),
            AuthorizationAction::AddScopedKey {
                public_key: scoped.public_key(),
                allowed_contract: f.merchant.clone(),
                allowed_methods: vec![CHARGE_METHOD.to_string()],
                allowance: Allowance::Limited(Amount::from_units(100)),
            },
        );
        let forged = ScopedKeyPair::generate()
            .secret_key()
            .sign(&tx.signing_bytes().unwrap());
        assert!(matches!(
            f.ledger.submit_authorization(&tx, &forged),
            Err(PingPayError::Auth(_))
        ));
        assert_eq!(f.ledger.access_key_count(&f.alice), 0);
    }

    #[test]
    fn test_charges_stop_at_allowance() {
        let f = fixture();
        let key = grant(&f, Allowance::Limited(Amount::from_units(300)));

        charge(&f, &key, 100, 1).unwrap();
        charge(&f, &key, 100, 2).unwrap();
        charge(&f, &key, 100, 3).unwrap();
        assert!(matches!(
            charge(&f, &key, 100, 4),
            Err(PingPayError::AllowanceExceeded { .. })
        ));

        assert_eq!(f.ledger.balance(&f.alice).unwrap(), Amount::from_units(9_700));
        assert_eq!(f.ledger.balance(&f.merchant).unwrap(), Amount::from_units(300));
        let grant = f.ledger.access_key(&f.alice, &key.public_key()).unwrap();
        assert_eq!(grant.remaining(), Some(Amount::zero()));
    }

    #[test]
    fn test_replayed_nonce_rejected() {
        let f = fixture();
        let key = grant(&f, Allowance::Unlimited);
        charge(&f, &key, 10, 1).unwrap();
        assert!(matches!(
            charge(&f, &key, 10, 1),
            Err(PingPayError::StaleNonce { nonce: 1, last: 1 })
        ));
        assert_eq!(f.ledger.balance(&f.merchant).unwrap(), Amount::from_units(10));
    }

    #[test]
    fn test_wrong_method_denied() {
        let f = fixture();
        let key = grant(&f, Allowance::Unlimited);
        let charge = ScopedCharge {
            signer_account: f.alice.clone(),
            public_key: key.public_key(),
            receiver_account: f.merchant.clone(),
            method: "withdrawAll".to_string(),
            amount: Amount::from_units(1),
            nonce: 1,
            subscription_id: SubscriptionId::new("sub_test").unwrap(),
        };
        let sig = key.secret_key().sign(&charge.signing_bytes().unwrap());
        assert!(matches!(
            f.ledger.charge(&charge, &sig),
            Err(PingPayError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_unknown_key_cannot_charge() {
        let f = fixture();
        let stranger = ScopedKeyPair::generate();
        assert!(matches!(
            charge(&f, &stranger, 1, 1),
            Err(PingPayError::NotFound { .. })
        ));
    }
}
