//! Ready-made ledger with a funded subscriber and a merchant.

use crate::ledger::LocalLedger;
use crate::wallet::{Approver, LocalLedgerWallet};
use crate::{AccountId, Amount, ScopedKeyPair};
use std::sync::Arc;

/// Parse an account id, panicking on invalid input.
pub fn test_account(name: &str) -> AccountId {
    AccountId::new(name).unwrap_or_else(|e| panic!("invalid test account {}: {}", name, e))
}

/// A local ledger with `alice.near` (funded) and `merchant.near`.
pub struct TestLedger {
    pub ledger: Arc<LocalLedger>,
    pub subscriber: AccountId,
    pub merchant: AccountId,
    subscriber_key: ScopedKeyPair,
}

impl TestLedger {
    /// Create the ledger with `balance` on the subscriber account.
    pub fn new(balance: u64) -> Self {
        let ledger = Arc::new(LocalLedger::new());
        let subscriber = test_account("alice.near");
        let merchant = test_account("merchant.near");
        let subscriber_key = ScopedKeyPair::generate();

        ledger
            .create_account(
                subscriber.clone(),
                subscriber_key.public_key(),
                Amount::from_units(balance),
            )
            .unwrap_or_else(|e| panic!("create subscriber: {}", e));
        ledger
            .create_account(
                merchant.clone(),
                ScopedKeyPair::generate().public_key(),
                Amount::zero(),
            )
            .unwrap_or_else(|e| panic!("create merchant: {}", e));

        Self {
            ledger,
            subscriber,
            merchant,
            subscriber_key,
        }
    }

    /// A local wallet holding the subscriber's full-access key.
    pub fn wallet(&self, approver: Approver) -> LocalLedgerWallet {
        let wallet = LocalLedgerWallet::new(self.ledger.clone(), approver);
        wallet.add_signer(
            self.subscriber.clone(),
            self.subscriber_key.secret_key().duplicate(),
        );
        wallet
    }

    /// A local wallet that approves every request.
    pub fn approving_wallet(&self) -> LocalLedgerWallet {
        self.wallet(Arc::new(|_| crate::wallet::Approval::Approve))
    }
}
