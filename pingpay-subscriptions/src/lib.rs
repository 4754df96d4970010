//! # PingPay Subscriptions
//!
//! Key issuance protocol for ledger-native subscriptions.
//!
//! A subscriber authorizes a merchant once by signing an `AddScopedKey`
//! grant for a fresh key pair. The grant's allowance is
//! `unit_amount × max_payments` and it may only call the merchant's charge
//! method. The private half is then escrowed with a custody tier that
//! executes charges on schedule once its worker account is verified on the
//! ledger.
//!
//! ## Security Model
//!
//! - Nothing is registered or deposited before the wallet returns a signed
//!   grant.
//! - Cancellation is only honoured while waiting for the signature. The
//!   wallet is told to withdraw its prompt and its final answer decides.
//! - Once signed, the escrow handshake runs to completion or ends in a
//!   resumable [`IssuanceError::EscrowIncomplete`].
//! - Private keys are never logged or serialized; custody stores them
//!   sealed with AES-256-GCM.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pingpay_lib::test_utils::TestLedger;
//! use pingpay_lib::encryption::{generate_master_key, EscrowCipher};
//! use pingpay_lib::Amount;
//! use pingpay_subscriptions::{
//!     cancel_pair, BillingFrequency, InMemoryCustodyService, IssuanceOrchestrator,
//!     SubscriptionIntent,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = TestLedger::new(10_000);
//! let custody = Arc::new(InMemoryCustodyService::new(EscrowCipher::new(generate_master_key())));
//! let orchestrator = IssuanceOrchestrator::new(Arc::new(ledger.approving_wallet()), custody);
//!
//! let intent = SubscriptionIntent::new(
//!     ledger.subscriber.clone(),
//!     ledger.merchant.clone(),
//!     "pro",
//!     Amount::from_units(100),
//!     BillingFrequency::Monthly,
//! )
//! .with_max_payments(12);
//!
//! let (_cancel, signal) = cancel_pair();
//! let receipt = orchestrator.issue(intent, signal).await?;
//! println!("issued {}", receipt.subscription_id);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod custody;
pub mod error;
pub mod frequency;
pub mod intent;
pub mod orchestrator;
pub mod projection;
pub mod state;

pub use builder::build_authorization;
pub use custody::{
    ChargeRun, EscrowRecord, ExecutedCharge, FailedCharge, InMemoryCustodyService,
    MonitoringStatus, QueueEntry, QueueStatus, WorkerStatus,
};
pub use error::IssuanceError;
pub use frequency::BillingFrequency;
pub use intent::{IssuancePolicy, SubscriptionIntent};
pub use orchestrator::{
    cancel_pair, CancelHandle, CancelSignal, IssuanceOrchestrator, IssuanceReceipt, PendingEscrow,
};
pub use projection::{
    LifecycleResult, PaymentRecord, SubscriptionRegistry, SubscriptionStatus, SubscriptionView,
};
pub use state::{FailureKind, IssuanceMachine, IssuanceState, StateCallback, StateChange, StateObservers};

/// Errors from subscription bookkeeping outside the issuance flow.
#[derive(thiserror::Error, Debug)]
pub enum SubscriptionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("limit exceeded")]
    LimitExceeded,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("custody worker is not registered and verified")]
    WorkerUnverified,
}
