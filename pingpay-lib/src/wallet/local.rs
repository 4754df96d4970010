//! Wallet backed by the in-process [`LocalLedger`].

use super::{PendingRequests, WalletSigningGateway};
use crate::ledger::LocalLedger;
use crate::{
    AccountId, Result, SecretKey, TransactionId, TransactionOutcome,
    UnsignedAuthorizationTransaction,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Subscriber decision for a signature request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Approval {
    /// Sign and submit.
    Approve,
    /// Close the prompt without signing.
    Cancel,
    /// Refuse with a reason shown to the caller.
    Reject(String),
}

/// Callback standing in for the subscriber's approval prompt.
///
/// Runs on the blocking pool, so it may wait on a terminal or other
/// synchronous input. A panicking approver counts as an abandoned prompt.
pub type Approver = Arc<dyn Fn(&UnsignedAuthorizationTransaction) -> Approval + Send + Sync>;

/// Local wallet that holds full-access keys and submits to a [`LocalLedger`].
///
/// # Example
///
/// ```
/// use pingpay_lib::ledger::LocalLedger;
/// use pingpay_lib::wallet::LocalLedgerWallet;
/// use std::sync::Arc;
///
/// let wallet = LocalLedgerWallet::auto_approve(Arc::new(LocalLedger::new()));
/// assert_eq!(pingpay_lib::wallet::WalletSigningGateway::backend_id(&wallet), "local");
/// ```
pub struct LocalLedgerWallet {
    ledger: Arc<LocalLedger>,
    signers: RwLock<HashMap<AccountId, SecretKey>>,
    approver: Approver,
    approval_delay: Option<Duration>,
    pending: PendingRequests,
}

impl LocalLedgerWallet {
    /// Create a wallet that asks `approver` before every signature.
    pub fn new(ledger: Arc<LocalLedger>, approver: Approver) -> Self {
        Self {
            ledger,
            signers: RwLock::new(HashMap::new()),
            approver,
            approval_delay: None,
            pending: PendingRequests::default(),
        }
    }

    /// Create a wallet that approves everything.
    pub fn auto_approve(ledger: Arc<LocalLedger>) -> Self {
        Self::new(ledger, Arc::new(|_| Approval::Approve))
    }

    /// Simulate the time a subscriber takes to answer the prompt.
    pub fn with_approval_delay(mut self, delay: Duration) -> Self {
        self.approval_delay = Some(delay);
        self
    }

    /// Add the full-access key for an account.
    pub fn add_signer(&self, account: AccountId, key: SecretKey) {
        let mut signers = self.signers.write().unwrap_or_else(|e| e.into_inner());
        signers.insert(account, key);
    }

    /// The ledger this wallet submits to.
    pub fn ledger(&self) -> &Arc<LocalLedger> {
        &self.ledger
    }

    fn sign(&self, account: &AccountId, message: &[u8]) -> Option<[u8; 64]> {
        let signers = self.signers.read().unwrap_or_else(|e| e.into_inner());
        signers.get(account).map(|key| key.sign(message))
    }
}

impl fmt::Debug for LocalLedgerWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let signers = self.signers.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("LocalLedgerWallet")
            .field("signers", &signers.keys().collect::<Vec<_>>())
            .field("approval_delay", &self.approval_delay)
            .finish()
    }
}

#[async_trait]
impl WalletSigningGateway for LocalLedgerWallet {
    fn backend_id(&self) -> &str {
        "local"
    }

    async fn request_signature(
        &self,
        tx: UnsignedAuthorizationTransaction,
    ) -> Result<TransactionOutcome> {
        let mut pending = self.pending.open(tx.transaction_id()?);

        if let Some(delay) = self.approval_delay {
            tokio::select! {
                biased;
                _ = pending.withdrawn() => return Ok(TransactionOutcome::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let approver = self.approver.clone();
        let prompt_tx = tx.clone();
        let prompt = tokio::task::spawn_blocking(move || approver(&prompt_tx));
        let approval = tokio::select! {
            biased;
            _ = pending.withdrawn() => return Ok(TransactionOutcome::cancelled()),
            answer = prompt => answer.unwrap_or(Approval::Cancel),
        };
        drop(pending);

        match approval {
            Approval::Approve => {}
            Approval::Cancel => return Ok(TransactionOutcome::cancelled()),
            Approval::Reject(reason) => return Ok(TransactionOutcome::failure(reason)),
        }

        let message = tx.signing_bytes()?;
        let Some(signature) = self.sign(tx.signer_account(), &message) else {
            return Ok(TransactionOutcome::failure(format!(
                "wallet holds no key for {}",
                tx.signer_account()
            )));
        };

        match self.ledger.submit_authorization(&tx, &signature) {
            Ok(tx_id) => Ok(TransactionOutcome::success(tx_id)),
            Err(e) => Ok(TransactionOutcome::failure(e.to_string())),
        }
    }

    async fn cancel_signature(&self, transaction_id: &TransactionId) -> Result<()> {
        if self.pending.withdraw(transaction_id) {
            #[cfg(feature = "tracing")]
            tracing::debug!(%transaction_id, "signature request withdrawn");
        }
        Ok(())
    }
}
