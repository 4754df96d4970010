//! Issuance orchestration.
//!
//! Drives one attempt through the state machine:
//!
//! 1. build the grant for a fresh scoped key pair,
//! 2. wait for the wallet (the only point the subscriber can cancel; a
//!    cancel is forwarded to the wallet and its final answer decides),
//! 3. register the public key, then deposit the private key, each with
//!    bounded retries.
//!
//! Steps 3 run on their own task. Once the grant is signed, dropping the
//! caller's future or firing the cancel handle does not stop the escrow
//! handshake; it either completes or ends in a resumable
//! [`IssuanceError::EscrowIncomplete`].

use crate::builder::build_authorization;
use crate::error::IssuanceError;
use crate::intent::{IssuancePolicy, SubscriptionIntent};
use crate::projection::SubscriptionRegistry;
use crate::state::{FailureKind, IssuanceMachine, IssuanceState, StateCallback, StateObservers};
use chrono::{DateTime, Utc};
use pingpay_lib::escrow::EscrowRegistrationClient;
use pingpay_lib::retry::{with_retry, RetryConfig};
use pingpay_lib::wallet::WalletSigningGateway;
use pingpay_lib::{Allowance, PublicKey, ScopedKeyPair, SubscriptionId, TransactionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// How long a cancelled attempt waits for the wallet to confirm.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(30);

/// Fires a cancellation while the attempt waits for the wallet.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cancellation.
    ///
    /// The attempt withdraws its wallet prompt and waits for the wallet's
    /// answer. A grant the subscriber approved first still completes.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving side of a [`CancelHandle`].
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once cancellation is requested; never if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

/// Create a linked cancel handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx: Some(rx) })
}

/// Proof of a completed issuance. Holds no key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceReceipt {
    pub subscription_id: SubscriptionId,
    pub intent: SubscriptionIntent,
    pub public_key: PublicKey,
    pub transaction_id: TransactionId,
    pub allowance: Allowance,
    pub completed_at: DateTime<Utc>,
}

/// In-memory marker for a signed grant whose escrow did not finish.
///
/// Carries the scoped key pair so the deposit can be retried without a new
/// signature. Not `Clone` or `Serialize`; the secret is zeroized when the
/// marker is dropped.
#[derive(Debug)]
pub struct PendingEscrow {
    subscription_id: SubscriptionId,
    intent: SubscriptionIntent,
    key_pair: ScopedKeyPair,
    transaction_id: TransactionId,
    allowance: Allowance,
    registered: bool,
    attempts: u32,
}

impl PendingEscrow {
    /// Subscription the grant belongs to.
    pub fn subscription_id(&self) -> &SubscriptionId {
        &self.subscription_id
    }

    /// The intent that was signed.
    pub fn intent(&self) -> &SubscriptionIntent {
        &self.intent
    }

    /// Public half of the granted key.
    pub fn public_key(&self) -> PublicKey {
        self.key_pair.public_key()
    }

    /// Ledger id of the signed grant.
    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    /// Whether registration already succeeded; resume then goes straight to deposit.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Number of escrow runs so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// State a resume continues from.
    pub fn resume_state(&self) -> IssuanceState {
        if self.registered {
            IssuanceState::Depositing
        } else {
            IssuanceState::Registering
        }
    }
}

/// Runs issuance attempts against a wallet and an escrow client.
pub struct IssuanceOrchestrator {
    wallet: Arc<dyn WalletSigningGateway>,
    escrow: Arc<dyn EscrowRegistrationClient>,
    policy: IssuancePolicy,
    retry: RetryConfig,
    observers: Arc<StateObservers>,
    registry: Option<Arc<SubscriptionRegistry>>,
    cancel_grace: Duration,
}

impl IssuanceOrchestrator {
    /// Create an orchestrator with a strict policy and default retries.
    pub fn new(
        wallet: Arc<dyn WalletSigningGateway>,
        escrow: Arc<dyn EscrowRegistrationClient>,
    ) -> Self {
        Self {
            wallet,
            escrow,
            policy: IssuancePolicy::strict(),
            retry: RetryConfig::default(),
            observers: Arc::new(StateObservers::default()),
            registry: None,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }

    /// Set the issuance policy.
    pub fn with_policy(mut self, policy: IssuancePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the retry schedule for registration and deposit.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// How long to wait for the wallet's answer after a cancel.
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Record completed subscriptions in `registry`.
    pub fn with_registry(mut self, registry: Arc<SubscriptionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// The issuance policy.
    pub fn policy(&self) -> &IssuancePolicy {
        &self.policy
    }

    /// Observer set shared by every attempt.
    pub fn observers(&self) -> &Arc<StateObservers> {
        &self.observers
    }

    /// Register a callback for state changes of every attempt.
    pub fn on_state_change(&self, callback: StateCallback) {
        self.observers.on_state_change(callback);
    }

    /// Run one attempt for `intent`.
    #[tracing::instrument(skip_all, fields(plan = %intent.plan_id, subscriber = %intent.subscriber))]
    pub async fn issue(
        &self,
        intent: SubscriptionIntent,
        mut cancel: CancelSignal,
    ) -> Result<IssuanceReceipt, IssuanceError> {
        let subscription_id = SubscriptionId::generate();
        let mut machine = IssuanceMachine::new(subscription_id.clone(), self.observers.clone());
        machine.advance(IssuanceState::Building, None);

        let key_pair = ScopedKeyPair::generate();
        let built = build_authorization(&intent, &self.policy, key_pair.public_key()).and_then(
            |tx| {
                let expected_id = tx
                    .transaction_id()
                    .map_err(|e| IssuanceError::InvalidIntent(e.to_string()))?;
                Ok((tx, expected_id))
            },
        );
        let (tx, expected_id) = match built {
            Ok(built) => built,
            Err(e) => {
                machine.advance(
                    IssuanceState::Failed(FailureKind::InvalidIntent),
                    Some(e.to_string()),
                );
                return Err(e);
            }
        };
        let allowance = tx.action().allowance();

        machine.advance(IssuanceState::AwaitingSignature, None);
        if cancel.is_cancelled() {
            machine.advance(
                IssuanceState::Failed(FailureKind::UserCancelled),
                Some("cancelled before the wallet was asked".into()),
            );
            return Err(IssuanceError::UserCancelled);
        }
        let request = self.wallet.request_signature(tx);
        tokio::pin!(request);
        let answered = tokio::select! {
            biased;
            result = &mut request => Some(result),
            _ = cancel.cancelled() => None,
        };

        let result = match answered {
            Some(result) => result,
            None => {
                tracing::debug!(transaction_id = %expected_id, "withdrawing signature request");
                if let Err(e) = self.wallet.cancel_signature(&expected_id).await {
                    tracing::warn!(error = %e, "wallet did not accept the withdrawal");
                }
                match tokio::time::timeout(self.cancel_grace, &mut request).await {
                    Ok(result) => result,
                    Err(_) => {
                        let detail = "wallet did not confirm the cancellation".to_string();
                        machine.advance(
                            IssuanceState::Failed(FailureKind::NetworkError),
                            Some(detail.clone()),
                        );
                        return Err(IssuanceError::Network(detail));
                    }
                }
            }
        };

        let transaction_id = match result {
            Ok(outcome) if outcome.is_user_cancelled() => {
                machine.advance(IssuanceState::Failed(FailureKind::UserCancelled), None);
                return Err(IssuanceError::UserCancelled);
            }
            Ok(outcome) if !outcome.succeeded => {
                let detail = outcome
                    .error_detail
                    .unwrap_or_else(|| "wallet reported failure".to_string());
                machine.advance(
                    IssuanceState::Failed(FailureKind::NetworkError),
                    Some(detail.clone()),
                );
                return Err(IssuanceError::Network(detail));
            }
            Ok(outcome) => outcome.transaction_id.unwrap_or(expected_id),
            Err(e) => {
                machine.advance(
                    IssuanceState::Failed(FailureKind::NetworkError),
                    Some(e.to_string()),
                );
                return Err(IssuanceError::Network(e.to_string()));
            }
        };
        if cancel.is_cancelled() {
            tracing::info!(transaction_id = %transaction_id, "grant was approved before the cancel reached the wallet");
        }

        machine.advance(IssuanceState::Signed, Some(transaction_id.to_string()));
        let pending = PendingEscrow {
            subscription_id,
            intent,
            key_pair,
            transaction_id,
            allowance,
            registered: false,
            attempts: 0,
        };
        self.run_escrow(machine, pending).await
    }

    /// Continue an attempt that ended in `EscrowIncomplete`, without re-signing.
    #[tracing::instrument(skip_all, fields(subscription = %pending.subscription_id))]
    pub async fn resume(&self, pending: PendingEscrow) -> Result<IssuanceReceipt, IssuanceError> {
        let machine =
            IssuanceMachine::resume(pending.subscription_id.clone(), self.observers.clone());
        self.run_escrow(machine, pending).await
    }

    async fn run_escrow(
        &self,
        machine: IssuanceMachine,
        pending: PendingEscrow,
    ) -> Result<IssuanceReceipt, IssuanceError> {
        let phase = EscrowPhase {
            escrow: self.escrow.clone(),
            retry: self.retry.clone(),
            registry: self.registry.clone(),
        };
        match tokio::spawn(phase.run(machine, pending)).await {
            Ok(result) => result,
            Err(e) => Err(IssuanceError::Network(format!("escrow task aborted: {}", e))),
        }
    }
}

/// Registration and deposit, owned by a spawned task.
struct EscrowPhase {
    escrow: Arc<dyn EscrowRegistrationClient>,
    retry: RetryConfig,
    registry: Option<Arc<SubscriptionRegistry>>,
}

impl EscrowPhase {
    async fn run(
        self,
        mut machine: IssuanceMachine,
        mut pending: PendingEscrow,
    ) -> Result<IssuanceReceipt, IssuanceError> {
        pending.attempts += 1;
        let escrow = self.escrow.as_ref();
        let subscription_id = pending.subscription_id.clone();
        let public_key = pending.key_pair.public_key();

        if !pending.registered {
            machine.advance(IssuanceState::Registering, None);
            let merchant = pending.intent.merchant.clone();
            let registered = with_retry(&self.retry, "register_key", || {
                escrow.register_key(&subscription_id, &public_key, &merchant)
            })
            .await;

            match registered {
                Ok(ack) if ack.success => pending.registered = true,
                Ok(ack) => {
                    let reason = ack
                        .message
                        .unwrap_or_else(|| "merchant refused the key".to_string());
                    machine.advance(
                        IssuanceState::Failed(FailureKind::RegistrationRejected),
                        Some(reason.clone()),
                    );
                    return Err(IssuanceError::RegistrationRejected(reason));
                }
                Err(e) => return Err(incomplete(&mut machine, pending, e.to_string())),
            }
        }

        machine.advance(IssuanceState::Depositing, None);
        let deposited = with_retry(&self.retry, "deposit_private_key", || {
            escrow.deposit_private_key(&subscription_id, pending.key_pair.secret_key(), &public_key)
        })
        .await;

        match deposited {
            Ok(ack) if ack.success => {}
            Ok(ack) => {
                let reason = ack
                    .message
                    .unwrap_or_else(|| "custody refused the deposit".to_string());
                return Err(incomplete(&mut machine, pending, reason));
            }
            Err(e) => return Err(incomplete(&mut machine, pending, e.to_string())),
        }

        machine.advance(IssuanceState::Complete, None);
        let receipt = IssuanceReceipt {
            subscription_id,
            public_key,
            transaction_id: pending.transaction_id.clone(),
            allowance: pending.allowance,
            intent: pending.intent.clone(),
            completed_at: Utc::now(),
        };
        // secret is zeroized here
        drop(pending);

        if let Some(registry) = &self.registry {
            registry.record_issued(&receipt);
        }
        Ok(receipt)
    }
}

fn incomplete(
    machine: &mut IssuanceMachine,
    pending: PendingEscrow,
    reason: String,
) -> IssuanceError {
    machine.advance(
        IssuanceState::Failed(FailureKind::EscrowIncomplete),
        Some(reason.clone()),
    );
    IssuanceError::EscrowIncomplete {
        pending: Box::new(pending),
        reason,
    }
}
