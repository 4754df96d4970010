//! Reference custody tier.
//!
//! [`InMemoryCustodyService`] accepts key registrations and deposits through
//! the [`EscrowRegistrationClient`] trait, keeps the private key sealed at
//! rest, and later uses it to execute due charges.
//!
//! Charges run under a worker account that must be verified against the
//! ledger first. Monitoring is explicit state on the service: it is started
//! and stopped through the service and reports what it is processing.

use crate::projection::{SubscriptionRegistry, SubscriptionView};
use crate::SubscriptionError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pingpay_lib::encryption::EscrowCipher;
use pingpay_lib::escrow::{DepositResult, EscrowAck, EscrowRegistrationClient, RegistrationResult};
use pingpay_lib::ledger::{ChargeSubmitter, ScopedCharge};
use pingpay_lib::transaction::CHARGE_METHOD;
use pingpay_lib::{
    AccountId, Amount, PingPayError, PublicKey, SecretKey, SubscriptionId, TransactionId,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use zeroize::Zeroizing;

/// Escrowed key for one subscription.
#[derive(Clone)]
pub struct EscrowRecord {
    pub subscription_id: SubscriptionId,
    pub public_key: PublicKey,
    /// AES-256-GCM ciphertext of the 32-byte private key.
    pub private_key_ciphertext: Vec<u8>,
    pub merchant_account: AccountId,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for EscrowRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscrowRecord")
            .field("subscription_id", &self.subscription_id)
            .field("public_key", &self.public_key)
            .field(
                "private_key_ciphertext",
                &format_args!("[{} bytes]", self.private_key_ciphertext.len()),
            )
            .field("merchant_account", &self.merchant_account)
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[derive(Debug, Clone)]
struct Registration {
    public_key: PublicKey,
    merchant_account: AccountId,
}

#[derive(Debug, Default)]
struct CustodyState {
    registrations: HashMap<SubscriptionId, Registration>,
    records: HashMap<SubscriptionId, EscrowRecord>,
}

/// Charge attempts allowed per payment before the subscription is failed.
pub const DEFAULT_MAX_CHARGE_RETRIES: u32 = 3;

/// Ledger identity the charge worker runs under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub account_id: Option<AccountId>,
    /// Registration was attempted against a ledger.
    pub registered: bool,
    /// The ledger confirmed the account exists.
    pub verified: bool,
}

/// Where a subscription stands in the worker's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueStatus {
    /// A charge is being submitted now.
    Processing,
    /// The last attempt failed and the next pass tries again.
    Retrying,
}

/// One subscription in the worker's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub subscription_id: SubscriptionId,
    pub status: QueueStatus,
    /// Failed attempts for the current payment.
    pub retry_count: u32,
}

/// Snapshot of the charge worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitoringStatus {
    pub is_monitoring: bool,
    /// Charges in flight and subscriptions waiting for a retry, by id.
    pub processing_queue: Vec<QueueEntry>,
    pub last_run: Option<DateTime<Utc>>,
    pub charges_executed: u64,
    pub charges_failed: u64,
}

#[derive(Default)]
struct MonitoringState {
    stop: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
    in_flight: HashSet<SubscriptionId>,
    retries: HashMap<SubscriptionId, u32>,
    last_run: Option<DateTime<Utc>>,
    charges_executed: u64,
    charges_failed: u64,
}

/// Exclusive right to charge one subscription, released on drop.
struct Claim<'a> {
    monitoring: &'a Mutex<MonitoringState>,
    id: SubscriptionId,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut monitoring = self.monitoring.lock().unwrap_or_else(|e| e.into_inner());
        monitoring.in_flight.remove(&self.id);
    }
}

/// A charge that went through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutedCharge {
    pub subscription_id: SubscriptionId,
    /// Absent when the charge was reconciled from the ledger's nonce.
    pub transaction_id: Option<TransactionId>,
    pub amount: Amount,
    /// 1-based payment number.
    pub payment_number: u32,
}

/// A charge that did not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedCharge {
    pub subscription_id: SubscriptionId,
    pub reason: String,
    /// The subscription stays due and is retried on the next run.
    pub retryable: bool,
}

/// Result of one pass over the due subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChargeRun {
    pub executed: Vec<ExecutedCharge>,
    pub failed: Vec<FailedCharge>,
    /// Charges the ledger had already applied for a booked payment.
    pub duplicates: Vec<SubscriptionId>,
}

enum ChargeError {
    Failed(FailedCharge),
    StaleNonce { last: u64 },
}

/// In-memory escrow and charge worker.
pub struct InMemoryCustodyService {
    cipher: EscrowCipher,
    state: RwLock<CustodyState>,
    monitoring: Mutex<MonitoringState>,
    worker: RwLock<WorkerStatus>,
    max_charge_retries: u32,
}

impl InMemoryCustodyService {
    /// Create a service sealing keys under `cipher`.
    pub fn new(cipher: EscrowCipher) -> Self {
        Self {
            cipher,
            state: RwLock::new(CustodyState::default()),
            monitoring: Mutex::new(MonitoringState::default()),
            worker: RwLock::new(WorkerStatus::default()),
            max_charge_retries: DEFAULT_MAX_CHARGE_RETRIES,
        }
    }

    /// Run charges as `account`. It still has to be registered.
    pub fn with_worker(self, account: AccountId) -> Self {
        {
            let mut worker = self.worker.write().unwrap_or_else(|e| e.into_inner());
            worker.account_id = Some(account);
        }
        self
    }

    /// Give up on a payment after this many failed attempts (at least one).
    pub fn with_max_charge_retries(mut self, max: u32) -> Self {
        self.max_charge_retries = max.max(1);
        self
    }

    /// Check the worker account against the ledger charges go to.
    ///
    /// Returns whether the worker is verified afterwards.
    #[tracing::instrument(skip_all)]
    pub async fn register_worker(&self, ledger: &dyn ChargeSubmitter) -> pingpay_lib::Result<bool> {
        let account = self.worker_address().ok_or_else(|| {
            PingPayError::ValidationFailed("no custody worker account configured".to_string())
        })?;
        let exists = ledger.account_exists(&account).await?;

        let mut worker = self.worker.write().unwrap_or_else(|e| e.into_inner());
        worker.registered = true;
        worker.verified = exists;
        if exists {
            tracing::info!(worker = %account, "custody worker verified");
        } else {
            tracing::warn!(worker = %account, "custody worker account not found on ledger");
        }
        Ok(exists)
    }

    /// The worker's identity and verification state.
    pub fn worker_account(&self) -> WorkerStatus {
        self.worker
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Account the worker runs under, if configured.
    pub fn worker_address(&self) -> Option<AccountId> {
        self.worker_account().account_id
    }

    /// Whether charges may run.
    pub fn is_worker_verified(&self) -> bool {
        self.worker.read().unwrap_or_else(|e| e.into_inner()).verified
    }

    /// Escrow record of a subscription.
    pub fn record(&self, subscription_id: &SubscriptionId) -> Option<EscrowRecord> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.records.get(subscription_id).cloned()
    }

    /// Number of escrow records.
    pub fn record_count(&self) -> usize {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.records.len()
    }

    /// Whether a key is registered for the subscription.
    pub fn is_registered(&self, subscription_id: &SubscriptionId) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.registrations.contains_key(subscription_id)
    }

    fn escrowed_key(&self, record: &EscrowRecord) -> Result<SecretKey, String> {
        let opened = self
            .cipher
            .unseal(
                &record.private_key_ciphertext,
                record.subscription_id.as_str(),
                &record.public_key.to_bytes(),
            )
            .map_err(|e| e.to_string())?;
        let mut raw = Zeroizing::new([0u8; 32]);
        if opened.len() != raw.len() {
            return Err("escrowed key has the wrong length".to_string());
        }
        raw.copy_from_slice(&opened);
        let secret = SecretKey::from_bytes(*raw);
        if secret.public_key() != record.public_key {
            return Err("escrowed key does not match its public key".to_string());
        }
        Ok(secret)
    }

    fn claim(&self, id: &SubscriptionId) -> Option<Claim<'_>> {
        let mut monitoring = self.monitoring.lock().unwrap_or_else(|e| e.into_inner());
        if !monitoring.in_flight.insert(id.clone()) {
            return None;
        }
        Some(Claim {
            monitoring: &self.monitoring,
            id: id.clone(),
        })
    }

    /// Count a failed attempt. Returns true once the payment is out of retries.
    fn note_retry(&self, id: &SubscriptionId) -> bool {
        let mut monitoring = self.monitoring.lock().unwrap_or_else(|e| e.into_inner());
        let count = monitoring.retries.entry(id.clone()).or_insert(0);
        *count += 1;
        if *count >= self.max_charge_retries {
            monitoring.retries.remove(id);
            return true;
        }
        false
    }

    fn clear_retries(&self, id: &SubscriptionId) {
        let mut monitoring = self.monitoring.lock().unwrap_or_else(|e| e.into_inner());
        monitoring.retries.remove(id);
    }

    /// Charge every subscription due at `now` once.
    ///
    /// Each charge is signed with the escrowed scoped key and uses
    /// `payments_made + 1` as its nonce. A subscription another pass is
    /// charging is skipped. Successful charges are booked in `registry`.
    /// Retryable failures stay due until they run out of attempts; other
    /// failures mark the subscription failed. A stale nonce never fails a
    /// subscription: the ledger already holds that charge.
    #[tracing::instrument(skip_all, fields(now = %now))]
    pub async fn execute_due_charges(
        &self,
        registry: &SubscriptionRegistry,
        submitter: &dyn ChargeSubmitter,
        now: DateTime<Utc>,
    ) -> Result<ChargeRun, SubscriptionError> {
        if !self.is_worker_verified() {
            return Err(SubscriptionError::WorkerUnverified);
        }

        let mut run = ChargeRun::default();
        for due in registry.due_subscriptions(now) {
            let Some(_claim) = self.claim(&due.id) else {
                tracing::debug!(subscription = %due.id, "charge already in flight");
                continue;
            };
            // another pass may have booked it since the due list was read
            let Some(view) = registry
                .get_subscription(&due.id)
                .filter(|view| view.is_due(now))
            else {
                continue;
            };
            self.charge_one(registry, submitter, &view, now, &mut run)
                .await;
        }

        let mut monitoring = self.monitoring.lock().unwrap_or_else(|e| e.into_inner());
        monitoring.last_run = Some(now);
        monitoring.charges_executed += run.executed.len() as u64;
        monitoring.charges_failed += run.failed.len() as u64;
        Ok(run)
    }

    async fn charge_one(
        &self,
        registry: &SubscriptionRegistry,
        submitter: &dyn ChargeSubmitter,
        view: &SubscriptionView,
        now: DateTime<Utc>,
        run: &mut ChargeRun,
    ) {
        let payment_number = view.payments_made.saturating_add(1);
        let result = match self.record(&view.id) {
            None => Err(ChargeError::Failed(FailedCharge {
                subscription_id: view.id.clone(),
                reason: "no escrowed key".to_string(),
                retryable: true,
            })),
            Some(record) if record.public_key != view.public_key => {
                Err(ChargeError::Failed(FailedCharge {
                    subscription_id: view.id.clone(),
                    reason: "escrowed key differs from the issued key".to_string(),
                    retryable: false,
                }))
            }
            Some(record) => {
                let charge = ScopedCharge {
                    signer_account: view.subscriber.clone(),
                    public_key: record.public_key,
                    receiver_account: view.merchant.clone(),
                    method: CHARGE_METHOD.to_string(),
                    amount: view.amount,
                    nonce: u64::from(payment_number),
                    subscription_id: view.id.clone(),
                };
                self.submit(&record, &charge, submitter).await
            }
        };

        let transaction_id = match result {
            Ok(transaction_id) => Some(transaction_id),
            Err(ChargeError::StaleNonce { last }) => {
                let booked = registry
                    .get_subscription(&view.id)
                    .map_or(0, |current| current.payments_made);
                if booked >= payment_number {
                    tracing::debug!(subscription = %view.id, payment_number, "charge already booked");
                    run.duplicates.push(view.id.clone());
                    return;
                }
                tracing::warn!(
                    subscription = %view.id,
                    payment_number,
                    ledger_nonce = last,
                    "ledger holds a charge that was never booked"
                );
                None
            }
            Err(ChargeError::Failed(mut failed)) => {
                registry.record_failed_charge(&view.id, now, &failed.reason);
                if failed.retryable && self.note_retry(&view.id) {
                    failed.retryable = false;
                    failed.reason = format!(
                        "gave up after {} attempts: {}",
                        self.max_charge_retries, failed.reason
                    );
                }
                if failed.retryable {
                    tracing::warn!(subscription = %view.id, reason = %failed.reason, "charge deferred");
                } else {
                    self.clear_retries(&view.id);
                    registry.mark_failed(&view.id, &failed.reason);
                }
                run.failed.push(failed);
                return;
            }
        };

        self.clear_retries(&view.id);
        match registry.record_payment(&view.id, now, transaction_id.clone()) {
            Ok(_) => {
                tracing::info!(
                    subscription = %view.id,
                    transaction_id = ?transaction_id,
                    payment_number,
                    "charge executed"
                );
                run.executed.push(ExecutedCharge {
                    subscription_id: view.id.clone(),
                    transaction_id,
                    amount: view.amount,
                    payment_number,
                });
            }
            Err(e) => run.failed.push(FailedCharge {
                subscription_id: view.id.clone(),
                reason: e.to_string(),
                retryable: false,
            }),
        }
    }

    async fn submit(
        &self,
        record: &EscrowRecord,
        charge: &ScopedCharge,
        submitter: &dyn ChargeSubmitter,
    ) -> Result<TransactionId, ChargeError> {
        let failed = |reason: String, retryable: bool| {
            ChargeError::Failed(FailedCharge {
                subscription_id: charge.subscription_id.clone(),
                reason,
                retryable,
            })
        };

        let signature = {
            let secret = self.escrowed_key(record).map_err(|e| failed(e, false))?;
            let message = charge
                .signing_bytes()
                .map_err(|e| failed(e.to_string(), false))?;
            secret.sign(&message)
        };

        submitter
            .submit_charge(charge, &signature)
            .await
            .map_err(|e| match e {
                PingPayError::StaleNonce { last, .. } => ChargeError::StaleNonce { last },
                e => failed(e.to_string(), e.is_retryable()),
            })
    }

    /// Run [`execute_due_charges`](Self::execute_due_charges) every
    /// `interval` on a background task. Returns false if already running.
    pub fn start_monitoring(
        self: &Arc<Self>,
        registry: Arc<SubscriptionRegistry>,
        submitter: Arc<dyn ChargeSubmitter>,
        interval: Duration,
    ) -> Result<bool, SubscriptionError> {
        if !self.is_worker_verified() {
            return Err(SubscriptionError::WorkerUnverified);
        }
        let mut monitoring = self.monitoring.lock().unwrap_or_else(|e| e.into_inner());
        if monitoring.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(false);
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let service = Arc::clone(self);
        let period = interval.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_requested(&mut stop_rx) => break,
                    _ = ticker.tick() => {
                        match service
                            .execute_due_charges(&registry, submitter.as_ref(), Utc::now())
                            .await
                        {
                            Ok(run) => tracing::debug!(
                                executed = run.executed.len(),
                                failed = run.failed.len(),
                                duplicates = run.duplicates.len(),
                                "monitoring pass finished"
                            ),
                            Err(e) => tracing::warn!(error = %e, "monitoring pass skipped"),
                        }
                    }
                }
            }
        });

        tracing::info!(interval_ms = period.as_millis() as u64, "custody monitoring started");
        monitoring.stop = Some(stop_tx);
        monitoring.task = Some(task);
        Ok(true)
    }

    /// Stop the background worker and wait for the current pass to finish.
    /// Returns false if it was not running.
    pub async fn stop_monitoring(&self) -> bool {
        let (stop, task) = {
            let mut monitoring = self.monitoring.lock().unwrap_or_else(|e| e.into_inner());
            (monitoring.stop.take(), monitoring.task.take())
        };
        let Some(task) = task else {
            return false;
        };
        if let Some(stop) = stop {
            stop.send_replace(true);
        }
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "custody monitoring task ended abnormally");
        }
        tracing::info!("custody monitoring stopped");
        true
    }

    /// Current worker state.
    pub fn monitoring_status(&self) -> MonitoringStatus {
        let monitoring = self.monitoring.lock().unwrap_or_else(|e| e.into_inner());
        let mut queue: Vec<QueueEntry> = monitoring
            .in_flight
            .iter()
            .map(|id| QueueEntry {
                subscription_id: id.clone(),
                status: QueueStatus::Processing,
                retry_count: monitoring.retries.get(id).copied().unwrap_or(0),
            })
            .chain(
                monitoring
                    .retries
                    .iter()
                    .filter(|(id, _)| !monitoring.in_flight.contains(*id))
                    .map(|(id, count)| QueueEntry {
                        subscription_id: id.clone(),
                        status: QueueStatus::Retrying,
                        retry_count: *count,
                    }),
            )
            .collect();
        queue.sort_by(|a, b| a.subscription_id.cmp(&b.subscription_id));

        MonitoringStatus {
            is_monitoring: monitoring
                .task
                .as_ref()
                .is_some_and(|task| !task.is_finished()),
            processing_queue: queue,
            last_run: monitoring.last_run,
            charges_executed: monitoring.charges_executed,
            charges_failed: monitoring.charges_failed,
        }
    }
}

/// Resolves once a stop is requested; never if the sender is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stop| *stop).await.is_ok() {
        return;
    }
    std::future::pending::<()>().await
}

impl std::fmt::Debug for InMemoryCustodyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCustodyService")
            .field("records", &self.record_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EscrowRegistrationClient for InMemoryCustodyService {
    async fn register_key(
        &self,
        subscription_id: &SubscriptionId,
        public_key: &PublicKey,
        merchant_account: &AccountId,
    ) -> pingpay_lib::Result<RegistrationResult> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = state.registrations.get(subscription_id) {
            if existing.public_key == *public_key {
                return Ok(EscrowAck::accepted());
            }
            return Ok(EscrowAck::rejected(
                "subscription is already registered with a different key",
            ));
        }

        state.registrations.insert(
            subscription_id.clone(),
            Registration {
                public_key: *public_key,
                merchant_account: merchant_account.clone(),
            },
        );
        tracing::debug!(subscription = %subscription_id, %public_key, "key registered");
        Ok(EscrowAck::accepted())
    }

    async fn deposit_private_key(
        &self,
        subscription_id: &SubscriptionId,
        private_key: &SecretKey,
        public_key: &PublicKey,
    ) -> pingpay_lib::Result<DepositResult> {
        if private_key.public_key() != *public_key {
            return Ok(EscrowAck::rejected("private key does not match public key"));
        }

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let merchant_account = match state.registrations.get(subscription_id) {
            None => return Ok(EscrowAck::rejected("key is not registered")),
            Some(reg) if reg.public_key != *public_key => {
                return Ok(EscrowAck::rejected("key differs from the registered key"))
            }
            Some(reg) => reg.merchant_account.clone(),
        };
        if let Some(existing) = state.records.get(subscription_id) {
            // identical re-deposit
            if existing.public_key == *public_key {
                return Ok(EscrowAck::accepted());
            }
            return Ok(EscrowAck::rejected("a different key is already escrowed"));
        }

        let ciphertext = self
            .cipher
            .seal(
                private_key.expose_bytes(),
                subscription_id.as_str(),
                &public_key.to_bytes(),
            )
            .map_err(|e| PingPayError::Internal(e.to_string()))?;

        state.records.insert(
            subscription_id.clone(),
            EscrowRecord {
                subscription_id: subscription_id.clone(),
                public_key: *public_key,
                private_key_ciphertext: ciphertext,
                merchant_account,
                created_at: Utc::now(),
            },
        );
        tracing::info!(subscription = %subscription_id, %public_key, "private key escrowed");
        Ok(EscrowAck::accepted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pingpay_lib::encryption::generate_master_key;
    use pingpay_lib::ledger::LocalLedger;
    use pingpay_lib::ScopedKeyPair;

    fn service() -> InMemoryCustodyService {
        InMemoryCustodyService::new(EscrowCipher::new(generate_master_key()))
    }

    fn merchant() -> AccountId {
        "merchant.near".parse().unwrap()
    }

    #[tokio::test]
    async fn test_deposit_requires_registration() {
        let custody = service();
        let id = SubscriptionId::generate();
        let key = ScopedKeyPair::generate();

        let ack = custody
            .deposit_private_key(&id, key.secret_key(), &key.public_key())
            .await
            .unwrap();
        assert!(!ack.success);
        assert_eq!(custody.record_count(), 0);
    }

    #[tokio::test]
    async fn test_idempotent_and_conflicting_keys() {
        let custody = service();
        let id = SubscriptionId::generate();
        let key = ScopedKeyPair::generate();
        let other = ScopedKeyPair::generate();

        for _ in 0..2 {
            let ack = custody
                .register_key(&id, &key.public_key(), &merchant())
                .await
                .unwrap();
            assert!(ack.success);
            let ack = custody
                .deposit_private_key(&id, key.secret_key(), &key.public_key())
                .await
                .unwrap();
            assert!(ack.success);
        }
        assert_eq!(custody.record_count(), 1);

        let ack = custody
            .register_key(&id, &other.public_key(), &merchant())
            .await
            .unwrap();
        assert!(!ack.success);
        let ack = custody
            .deposit_private_key(&id, other.secret_key(), &other.public_key())
            .await
            .unwrap();
        assert!(!ack.success);
        assert_eq!(custody.record(&id).unwrap().public_key, key.public_key());
    }

    #[tokio::test]
    async fn test_record_is_sealed() {
        let custody = service();
        let id = SubscriptionId::generate();
        let key = ScopedKeyPair::generate();
        custody
            .register_key(&id, &key.public_key(), &merchant())
            .await
            .unwrap();
        custody
            .deposit_private_key(&id, key.secret_key(), &key.public_key())
            .await
            .unwrap();

        let record = custody.record(&id).unwrap();
        assert_eq!(record.merchant_account, merchant());
        assert!(!record
            .private_key_ciphertext
            .windows(32)
            .any(|w| w == key.secret_key().expose_bytes()));
        assert!(!format!("{:?}", record).contains(&key.secret_key().expose_hex()));

        let opened = custody.escrowed_key(&record).unwrap();
        assert_eq!(opened.public_key(), key.public_key());
    }

    #[tokio::test]
    async fn test_mismatched_deposit_rejected() {
        let custody = service();
        let id = SubscriptionId::generate();
        let key = ScopedKeyPair::generate();
        let other = ScopedKeyPair::generate();
        custody
            .register_key(&id, &key.public_key(), &merchant())
            .await
            .unwrap();

        let ack = custody
            .deposit_private_key(&id, other.secret_key(), &key.public_key())
            .await
            .unwrap();
        assert!(!ack.success);
        assert_eq!(custody.record_count(), 0);
    }

    #[tokio::test]
    async fn test_monitoring_status_without_worker() {
        let custody = Arc::new(service());
        assert!(!custody.monitoring_status().is_monitoring);
        assert!(!custody.stop_monitoring().await);
    }

    #[tokio::test]
    async fn test_worker_registration() {
        let ledger = LocalLedger::new();
        assert!(service().register_worker(&ledger).await.is_err());

        let custody = service().with_worker(merchant());
        assert_eq!(custody.worker_address(), Some(merchant()));
        assert!(!custody.worker_account().registered);

        assert!(!custody.register_worker(&ledger).await.unwrap());
        let status = custody.worker_account();
        assert!(status.registered);
        assert!(!status.verified);

        ledger
            .create_account(merchant(), ScopedKeyPair::generate().public_key(), Amount::zero())
            .unwrap();
        assert!(custody.register_worker(&ledger).await.unwrap());
        assert!(custody.is_worker_verified());
    }

    #[tokio::test]
    async fn test_charges_require_verified_worker() {
        let custody = Arc::new(service().with_worker(merchant()));
        let registry = Arc::new(SubscriptionRegistry::new());
        let ledger = Arc::new(LocalLedger::new());

        assert!(matches!(
            custody
                .execute_due_charges(&registry, ledger.as_ref(), Utc::now())
                .await,
            Err(SubscriptionError::WorkerUnverified)
        ));
        assert!(matches!(
            custody.start_monitoring(registry, ledger, Duration::from_millis(10)),
            Err(SubscriptionError::WorkerUnverified)
        ));
        assert!(!custody.monitoring_status().is_monitoring);
    }

    #[test]
    fn test_queue_status_serializes_uppercase() {
        let entry = QueueEntry {
            subscription_id: SubscriptionId::generate(),
            status: QueueStatus::Retrying,
            retry_count: 2,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "RETRYING");
        assert_eq!(json["retry_count"], 2);
    }
}
