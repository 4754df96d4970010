//! End-to-end issuance against the local ledger, in-memory custody and
//! scripted collaborators.

use chrono::TimeDelta;
use pingpay_lib::encryption::{generate_master_key, EscrowCipher};
use pingpay_lib::escrow::EscrowAck;
use pingpay_lib::retry::RetryConfig;
use pingpay_lib::test_utils::{
    test_account, EscrowCall, RecordingEscrow, ScriptedWallet, TestLedger, WalletScript,
};
use pingpay_lib::wallet::Approval;
use pingpay_lib::{Allowance, Amount, PingPayError};
use pingpay_subscriptions::{
    cancel_pair, BillingFrequency, CancelSignal, FailureKind, InMemoryCustodyService,
    IssuanceError, IssuanceOrchestrator, IssuanceState, SubscriptionIntent, SubscriptionRegistry,
    SubscriptionStatus,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn intent(ledger: &TestLedger, unit: u64, max: u32) -> SubscriptionIntent {
    SubscriptionIntent::new(
        ledger.subscriber.clone(),
        ledger.merchant.clone(),
        "pro-monthly",
        Amount::from_units(unit),
        BillingFrequency::Monthly,
    )
    .with_max_payments(max)
}

fn custody() -> Arc<InMemoryCustodyService> {
    Arc::new(
        InMemoryCustodyService::new(EscrowCipher::new(generate_master_key()))
            .with_worker(test_account("merchant.near")),
    )
}

fn fast_retry() -> RetryConfig {
    RetryConfig::default()
        .with_initial_delay_ms(1)
        .with_max_delay_ms(5)
}

fn transport_error() -> PingPayError {
    PingPayError::Transport("connection reset".into())
}

fn scripted(
    wallet: ScriptedWallet,
    escrow: Arc<RecordingEscrow>,
) -> (Arc<ScriptedWallet>, IssuanceOrchestrator) {
    let wallet = Arc::new(wallet);
    let orchestrator =
        IssuanceOrchestrator::new(wallet.clone(), escrow).with_retry(fast_retry());
    (wallet, orchestrator)
}

#[tokio::test]
async fn test_issue_and_charge_on_local_ledger() {
    let ledger = TestLedger::new(10_000);
    let custody = custody();
    let registry = Arc::new(SubscriptionRegistry::new());
    let orchestrator =
        IssuanceOrchestrator::new(Arc::new(ledger.approving_wallet()), custody.clone())
            .with_registry(registry.clone());

    let receipt = orchestrator
        .issue(intent(&ledger, 100, 3), CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(receipt.allowance, Allowance::Limited(Amount::from_units(300)));
    let grant = ledger
        .ledger
        .access_key(&ledger.subscriber, &receipt.public_key)
        .unwrap();
    assert_eq!(grant.receiver, ledger.merchant);
    assert_eq!(grant.allowance, receipt.allowance);

    let record = custody.record(&receipt.subscription_id).unwrap();
    assert_eq!(record.public_key, receipt.public_key);
    assert_eq!(record.merchant_account, ledger.merchant);

    let view = registry.get_subscription(&receipt.subscription_id).unwrap();
    assert_eq!(view.status, SubscriptionStatus::Active);

    assert!(custody.register_worker(ledger.ledger.as_ref()).await.unwrap());
    let start = receipt.completed_at;
    for period in 0..3 {
        let now = start + TimeDelta::days(30 * period);
        let run = custody
            .execute_due_charges(&registry, ledger.ledger.as_ref(), now)
            .await
            .unwrap();
        assert_eq!(run.executed.len(), 1, "period {}", period);
        assert!(run.failed.is_empty());
    }

    // fourth period: limit reached, nothing due
    let run = custody
        .execute_due_charges(&registry, ledger.ledger.as_ref(), start + TimeDelta::days(90))
        .await
        .unwrap();
    assert!(run.executed.is_empty());

    assert_eq!(
        ledger.ledger.balance(&ledger.merchant).unwrap(),
        Amount::from_units(300)
    );
    assert_eq!(
        ledger.ledger.balance(&ledger.subscriber).unwrap(),
        Amount::from_units(9_700)
    );
    let view = registry.get_subscription(&receipt.subscription_id).unwrap();
    assert_eq!(view.payments_made, 3);
    assert_eq!(view.progress(), Some(1.0));
    assert_eq!(custody.monitoring_status().charges_executed, 3);

    let history = registry.payment_history(&receipt.subscription_id);
    let numbers: Vec<_> = history.iter().map(|p| p.payment_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(history
        .iter()
        .all(|p| p.success && p.transaction_id.is_some() && p.amount == Amount::from_units(100)));
}

#[tokio::test]
async fn test_observers_see_happy_path_in_order() {
    let ledger = TestLedger::new(1_000);
    let orchestrator = IssuanceOrchestrator::new(Arc::new(ledger.approving_wallet()), custody());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    orchestrator.on_state_change(Arc::new(move |change| {
        sink.lock().unwrap().push(change.to);
    }));

    orchestrator
        .issue(intent(&ledger, 10, 1), CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            IssuanceState::Building,
            IssuanceState::AwaitingSignature,
            IssuanceState::Signed,
            IssuanceState::Registering,
            IssuanceState::Depositing,
            IssuanceState::Complete,
        ]
    );
}

#[tokio::test]
async fn test_wallet_cancel_leaves_nothing_behind() {
    let ledger = TestLedger::new(1_000);
    let custody = custody();
    let wallet = ledger.wallet(Arc::new(|_| Approval::Cancel));
    let orchestrator = IssuanceOrchestrator::new(Arc::new(wallet), custody.clone());

    let err = orchestrator
        .issue(intent(&ledger, 10, 1), CancelSignal::never())
        .await
        .unwrap_err();

    assert!(matches!(err, IssuanceError::UserCancelled));
    assert!(!err.is_resumable());
    assert_eq!(custody.record_count(), 0);
    assert_eq!(ledger.ledger.access_key_count(&ledger.subscriber), 0);
}

#[tokio::test]
async fn test_cancel_handle_during_signature_wait() {
    let escrow = Arc::new(RecordingEscrow::new());
    let (wallet, orchestrator) = scripted(
        ScriptedWallet::approving().with_delay(Duration::from_secs(30)),
        escrow.clone(),
    );
    let ledger = TestLedger::new(1_000);

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.issue(intent(&ledger, 10, 1), signal),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert!(matches!(err, IssuanceError::UserCancelled));
    let requests = wallet.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        wallet.cancellations(),
        vec![requests[0].transaction_id().unwrap()]
    );
    assert!(escrow.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_before_wallet_is_asked() {
    let escrow = Arc::new(RecordingEscrow::new());
    let (wallet, orchestrator) = scripted(ScriptedWallet::approving(), escrow.clone());
    let ledger = TestLedger::new(1_000);

    let (handle, signal) = cancel_pair();
    handle.cancel();
    let err = orchestrator
        .issue(intent(&ledger, 10, 1), signal)
        .await
        .unwrap_err();

    assert!(matches!(err, IssuanceError::UserCancelled));
    assert!(wallet.requests().is_empty());
    assert!(wallet.cancellations().is_empty());
}

#[tokio::test]
async fn test_approval_that_beats_the_cancel_completes() {
    let escrow = Arc::new(RecordingEscrow::new());
    let (wallet, orchestrator) = scripted(
        ScriptedWallet::approving()
            .with_delay(Duration::from_millis(50))
            .ignoring_cancellation(),
        escrow.clone(),
    );
    let ledger = TestLedger::new(1_000);

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
    });

    let receipt = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.issue(intent(&ledger, 10, 1), signal),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(wallet.cancellations(), vec![receipt.transaction_id.clone()]);
    assert_eq!(escrow.record_count(), 1);
}

#[tokio::test]
async fn test_unconfirmed_cancel_gives_up_after_grace() {
    let escrow = Arc::new(RecordingEscrow::new());
    let (wallet, orchestrator) = scripted(
        ScriptedWallet::approving()
            .with_delay(Duration::from_secs(30))
            .ignoring_cancellation(),
        escrow.clone(),
    );
    let orchestrator = orchestrator.with_cancel_grace(Duration::from_millis(50));
    let ledger = TestLedger::new(1_000);

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.issue(intent(&ledger, 10, 1), signal),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert_eq!(err.kind(), FailureKind::NetworkError);
    assert!(!err.is_resumable());
    assert_eq!(wallet.cancellations().len(), 1);
    assert!(escrow.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_after_signing_is_ignored() {
    let ledger = TestLedger::new(1_000);
    let custody = custody();
    let orchestrator =
        IssuanceOrchestrator::new(Arc::new(ledger.approving_wallet()), custody.clone());

    let (handle, signal) = cancel_pair();
    orchestrator.on_state_change(Arc::new(move |change| {
        if change.to == IssuanceState::Signed {
            handle.cancel();
        }
    }));

    let receipt = orchestrator
        .issue(intent(&ledger, 10, 2), signal)
        .await
        .unwrap();
    assert!(custody.record(&receipt.subscription_id).is_some());
}

#[tokio::test]
async fn test_wallet_failures_are_terminal_network_errors() {
    let ledger = TestLedger::new(1_000);
    for script in [
        WalletScript::Fail("InsufficientBalance".into()),
        WalletScript::Unreachable,
    ] {
        let escrow = Arc::new(RecordingEscrow::new());
        let (_, orchestrator) = scripted(ScriptedWallet::new(script), escrow.clone());

        let err = orchestrator
            .issue(intent(&ledger, 10, 1), CancelSignal::never())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::NetworkError);
        assert!(!err.is_resumable());
        assert!(escrow.calls().is_empty());
    }
}

#[tokio::test]
async fn test_invalid_intent_never_reaches_wallet() {
    let ledger = TestLedger::new(1_000);
    let escrow = Arc::new(RecordingEscrow::new());
    let (wallet, orchestrator) = scripted(ScriptedWallet::approving(), escrow.clone());

    // no max_payments and no policy opt-in
    let open = SubscriptionIntent::new(
        ledger.subscriber.clone(),
        ledger.merchant.clone(),
        "open",
        Amount::from_units(10),
        BillingFrequency::Weekly,
    )
    .confirm_no_limit();

    let err = orchestrator
        .issue(open, CancelSignal::never())
        .await
        .unwrap_err();
    assert!(matches!(err, IssuanceError::InvalidIntent(_)));
    assert!(wallet.requests().is_empty());
    assert!(escrow.calls().is_empty());
}

#[tokio::test]
async fn test_deposit_failure_resumes_without_resigning() {
    let ledger = TestLedger::new(1_000);
    let escrow = Arc::new(RecordingEscrow::new());
    let (wallet, orchestrator) = scripted(ScriptedWallet::approving(), escrow.clone());
    let orchestrator = orchestrator.with_retry(RetryConfig::none());
    escrow.fail_next_deposit(transport_error());

    let err = orchestrator
        .issue(intent(&ledger, 10, 4), CancelSignal::never())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::EscrowIncomplete);
    assert!(err.is_resumable());
    assert_eq!(escrow.record_count(), 0);

    let pending = err.into_pending().unwrap();
    assert!(pending.is_registered());
    assert_eq!(pending.resume_state(), IssuanceState::Depositing);
    let subscription_id = pending.subscription_id().clone();

    let receipt = orchestrator.resume(pending).await.unwrap();
    assert_eq!(receipt.subscription_id, subscription_id);
    assert_eq!(escrow.record_count(), 1);
    assert_eq!(wallet.requests().len(), 1);

    let kinds: Vec<_> = escrow
        .calls()
        .into_iter()
        .map(|call| matches!(call, EscrowCall::Register { .. }))
        .collect();
    assert_eq!(kinds, vec![true, false, false]);
}

#[tokio::test]
async fn test_registration_outage_resumes_from_registering() {
    let ledger = TestLedger::new(1_000);
    let escrow = Arc::new(RecordingEscrow::new());
    let (_, orchestrator) = scripted(ScriptedWallet::approving(), escrow.clone());
    for _ in 0..3 {
        escrow.fail_next_register(transport_error());
    }

    let err = orchestrator
        .issue(intent(&ledger, 10, 1), CancelSignal::never())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::EscrowIncomplete);
    assert_eq!(escrow.calls().len(), 3);
    assert_eq!(escrow.deposit_attempts(), 0);

    let pending = err.into_pending().unwrap();
    assert!(!pending.is_registered());
    orchestrator.resume(pending).await.unwrap();
    assert_eq!(escrow.record_count(), 1);
}

#[tokio::test]
async fn test_transient_registration_error_is_retried() {
    let ledger = TestLedger::new(1_000);
    let escrow = Arc::new(RecordingEscrow::new());
    let (_, orchestrator) = scripted(ScriptedWallet::approving(), escrow.clone());
    escrow.fail_next_register(transport_error());

    orchestrator
        .issue(intent(&ledger, 10, 1), CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(escrow.calls().len(), 3);
    assert_eq!(escrow.deposit_attempts(), 1);
}

#[tokio::test]
async fn test_registration_rejection_is_terminal() {
    let ledger = TestLedger::new(1_000);
    let escrow = Arc::new(RecordingEscrow::new());
    let (_, orchestrator) = scripted(ScriptedWallet::approving(), escrow.clone());
    escrow.script_register(Ok(EscrowAck::rejected("unknown plan")));

    let err = orchestrator
        .issue(intent(&ledger, 10, 1), CancelSignal::never())
        .await
        .unwrap_err();
    assert!(matches!(err, IssuanceError::RegistrationRejected(ref m) if m == "unknown plan"));
    assert!(!err.is_resumable());
    assert_eq!(escrow.deposit_attempts(), 0);
}

#[tokio::test]
async fn test_deposit_refusal_is_resumable() {
    let ledger = TestLedger::new(1_000);
    let escrow = Arc::new(RecordingEscrow::new());
    let (_, orchestrator) = scripted(ScriptedWallet::approving(), escrow.clone());
    escrow.script_deposit(Ok(EscrowAck::rejected("custody busy")));

    let err = orchestrator
        .issue(intent(&ledger, 10, 1), CancelSignal::never())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::EscrowIncomplete);
    assert!(err.to_string().contains("custody busy"));

    orchestrator.resume(err.into_pending().unwrap()).await.unwrap();
    assert_eq!(escrow.record_count(), 1);
}

#[tokio::test]
async fn test_unlimited_grant_when_policy_and_subscriber_agree() {
    let ledger = TestLedger::new(1_000);
    let orchestrator = IssuanceOrchestrator::new(Arc::new(ledger.approving_wallet()), custody())
        .with_policy(pingpay_subscriptions::IssuancePolicy::default().with_allow_no_limit(true));

    let open = SubscriptionIntent::new(
        ledger.subscriber.clone(),
        ledger.merchant.clone(),
        "open",
        Amount::from_units(25),
        BillingFrequency::Daily,
    )
    .confirm_no_limit();

    let receipt = orchestrator
        .issue(open, CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(receipt.allowance, Allowance::Unlimited);
    let grant = ledger
        .ledger
        .access_key(&ledger.subscriber, &receipt.public_key)
        .unwrap();
    assert!(grant.allowance.is_unlimited());
}
