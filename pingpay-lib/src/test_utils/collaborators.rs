//! Scripted wallet and recording escrow client.

use crate::escrow::{DepositResult, EscrowAck, EscrowRegistrationClient, RegistrationResult};
use crate::wallet::{PendingRequests, WalletSigningGateway};
use crate::{
    AccountId, PingPayError, PublicKey, Result, SecretKey, SubscriptionId, TransactionId,
    TransactionOutcome, UnsignedAuthorizationTransaction,
};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// What a [`ScriptedWallet`] answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletScript {
    /// Succeed with the transaction's own id.
    Approve,
    /// Resolve as a user cancellation.
    Cancel,
    /// Resolve as a ledger/wallet failure with this detail.
    Fail(String),
    /// Return a transport error.
    Unreachable,
}

/// Wallet double that answers from a script and records what it was asked.
///
/// A request withdrawn while the wallet is still waiting resolves as a
/// cancellation, unless the wallet was built with
/// [`ignoring_cancellation`](Self::ignoring_cancellation).
pub struct ScriptedWallet {
    script: WalletScript,
    delay: Option<Duration>,
    honours_cancel: bool,
    pending: PendingRequests,
    requests: Mutex<Vec<UnsignedAuthorizationTransaction>>,
    cancellations: Mutex<Vec<TransactionId>>,
}

impl ScriptedWallet {
    /// Wallet answering every request with `script`.
    pub fn new(script: WalletScript) -> Self {
        Self {
            script,
            delay: None,
            honours_cancel: true,
            pending: PendingRequests::default(),
            requests: Mutex::new(Vec::new()),
            cancellations: Mutex::new(Vec::new()),
        }
    }

    /// Wallet that approves every request.
    pub fn approving() -> Self {
        Self::new(WalletScript::Approve)
    }

    /// Wait before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Record cancellations but answer from the script anyway, as a wallet
    /// whose user already confirmed would.
    pub fn ignoring_cancellation(mut self) -> Self {
        self.honours_cancel = false;
        self
    }

    /// Transactions received so far.
    pub fn requests(&self) -> Vec<UnsignedAuthorizationTransaction> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Transaction ids the caller asked to withdraw.
    pub fn cancellations(&self) -> Vec<TransactionId> {
        self.cancellations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl WalletSigningGateway for ScriptedWallet {
    fn backend_id(&self) -> &str {
        "scripted"
    }

    async fn request_signature(
        &self,
        tx: UnsignedAuthorizationTransaction,
    ) -> Result<TransactionOutcome> {
        let tx_id = tx.transaction_id()?;
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);

        let mut pending = self.pending.open(tx_id.clone());
        if let Some(delay) = self.delay {
            if self.honours_cancel {
                tokio::select! {
                    biased;
                    _ = pending.withdrawn() => return Ok(TransactionOutcome::cancelled()),
                    _ = tokio::time::sleep(delay) => {}
                }
            } else {
                tokio::time::sleep(delay).await;
            }
        }
        if self.honours_cancel && pending.is_withdrawn() {
            return Ok(TransactionOutcome::cancelled());
        }
        drop(pending);

        match &self.script {
            WalletScript::Approve => Ok(TransactionOutcome::success(tx_id)),
            WalletScript::Cancel => Ok(TransactionOutcome::cancelled()),
            WalletScript::Fail(detail) => Ok(TransactionOutcome::failure(detail.clone())),
            WalletScript::Unreachable => Err(PingPayError::Transport("wallet unreachable".into())),
        }
    }

    async fn cancel_signature(&self, transaction_id: &TransactionId) -> Result<()> {
        self.cancellations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(transaction_id.clone());
        self.pending.withdraw(transaction_id);
        Ok(())
    }
}

/// One call observed by [`RecordingEscrow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowCall {
    Register {
        subscription_id: SubscriptionId,
        public_key: PublicKey,
    },
    Deposit {
        subscription_id: SubscriptionId,
        public_key: PublicKey,
    },
}

#[derive(Default)]
struct EscrowState {
    calls: Vec<EscrowCall>,
    register_script: VecDeque<Result<RegistrationResult>>,
    deposit_script: VecDeque<Result<DepositResult>>,
    registered: HashSet<(SubscriptionId, PublicKey)>,
    records: HashSet<(SubscriptionId, PublicKey)>,
}

/// Escrow double that records calls and answers from per-call scripts.
///
/// When a script is empty the call succeeds. A deposit for a key that was
/// never successfully registered is refused.
#[derive(Default)]
pub struct RecordingEscrow {
    state: Mutex<EscrowState>,
}

impl RecordingEscrow {
    /// Create an escrow double that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer to the next registration.
    pub fn script_register(&self, answer: Result<RegistrationResult>) {
        self.lock().register_script.push_back(answer);
    }

    /// Queue the answer to the next deposit.
    pub fn script_deposit(&self, answer: Result<DepositResult>) {
        self.lock().deposit_script.push_back(answer);
    }

    /// Make the next registration fail with `err`.
    pub fn fail_next_register(&self, err: PingPayError) {
        self.script_register(Err(err));
    }

    /// Make the next deposit fail with `err`.
    pub fn fail_next_deposit(&self, err: PingPayError) {
        self.script_deposit(Err(err));
    }

    /// Every call in order.
    pub fn calls(&self) -> Vec<EscrowCall> {
        self.lock().calls.clone()
    }

    /// Number of deposit attempts.
    pub fn deposit_attempts(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, EscrowCall::Deposit { .. }))
            .count()
    }

    /// Number of distinct escrow records held.
    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EscrowState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EscrowRegistrationClient for RecordingEscrow {
    async fn register_key(
        &self,
        subscription_id: &SubscriptionId,
        public_key: &PublicKey,
        _merchant_account: &AccountId,
    ) -> Result<RegistrationResult> {
        let mut state = self.lock();
        state.calls.push(EscrowCall::Register {
            subscription_id: subscription_id.clone(),
            public_key: *public_key,
        });
        let answer = state
            .register_script
            .pop_front()
            .unwrap_or_else(|| Ok(EscrowAck::accepted()));
        if matches!(&answer, Ok(ack) if ack.success) {
            state
                .registered
                .insert((subscription_id.clone(), *public_key));
        }
        answer
    }

    async fn deposit_private_key(
        &self,
        subscription_id: &SubscriptionId,
        private_key: &SecretKey,
        public_key: &PublicKey,
    ) -> Result<DepositResult> {
        let mut state = self.lock();
        state.calls.push(EscrowCall::Deposit {
            subscription_id: subscription_id.clone(),
            public_key: *public_key,
        });
        let key = (subscription_id.clone(), *public_key);
        if !state.registered.contains(&key) {
            return Ok(EscrowAck::rejected("key not registered"));
        }
        if private_key.public_key() != *public_key {
            return Ok(EscrowAck::rejected("private key does not match"));
        }
        let answer = state
            .deposit_script
            .pop_front()
            .unwrap_or_else(|| Ok(EscrowAck::accepted()));
        if matches!(&answer, Ok(ack) if ack.success) {
            state.records.insert(key);
        }
        answer
    }
}
