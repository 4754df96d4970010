//! Subscription state projection.
//!
//! A read model of issued subscriptions plus the lifecycle switches
//! (pause / resume / cancel) and the bookkeeping the custody worker needs
//! to decide which subscriptions are due.

use crate::frequency::BillingFrequency;
use crate::orchestrator::IssuanceReceipt;
use crate::SubscriptionError;
use chrono::{DateTime, Utc};
use pingpay_lib::{AccountId, Amount, PublicKey, SubscriptionId, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// Lifecycle status of an issued subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Canceled,
    Failed,
}

impl SubscriptionStatus {
    /// Message shown to the subscriber.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Active => "Your subscription is active and payments will be processed according to the schedule.",
            Self::Paused => "Your subscription is paused. No payments will be processed until you resume it.",
            Self::Canceled => "Your subscription has been canceled. No further payments will be processed.",
            Self::Failed => "Your subscription has failed. Please check your payment method and try again.",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Canceled => "CANCELED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// One charge attempt as the subscriber sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// 1-based payment this attempt was for.
    pub payment_number: u32,
    pub success: bool,
    /// Ledger id of the charge; absent when the charge was reconciled
    /// from the ledger's nonce rather than observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    pub amount: Amount,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Projection of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionView {
    pub id: SubscriptionId,
    pub subscriber: AccountId,
    pub merchant: AccountId,
    pub plan_id: String,
    pub public_key: PublicKey,
    pub amount: Amount,
    pub frequency: BillingFrequency,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub next_payment_date: Option<DateTime<Utc>>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub payments_made: u32,
    pub max_payments: Option<u32>,
    pub end_date: Option<DateTime<Utc>>,
    /// Charge attempts, oldest first.
    #[serde(default)]
    pub payment_history: Vec<PaymentRecord>,
}

impl SubscriptionView {
    /// Project a completed issuance. The first charge is due immediately.
    pub fn from_receipt(receipt: &IssuanceReceipt) -> Self {
        let intent = &receipt.intent;
        let created_at = receipt.completed_at;
        let end_date = intent
            .max_payments
            .and_then(|max| i32::try_from(max).ok())
            .and_then(|max| intent.frequency.period().checked_mul(max))
            .and_then(|span| created_at.checked_add_signed(span));

        Self {
            id: receipt.subscription_id.clone(),
            subscriber: intent.subscriber.clone(),
            merchant: intent.merchant.clone(),
            plan_id: intent.plan_id.clone(),
            public_key: receipt.public_key,
            amount: intent.unit_amount,
            frequency: intent.frequency,
            status: SubscriptionStatus::Active,
            created_at,
            next_payment_date: Some(created_at),
            last_payment_date: None,
            payments_made: 0,
            max_payments: intent.max_payments,
            end_date,
            payment_history: Vec::new(),
        }
    }

    /// Fraction of `max_payments` already charged; `None` without a limit.
    pub fn progress(&self) -> Option<f64> {
        self.max_payments
            .map(|max| (self.payments_made as f64 / max as f64).min(1.0))
    }

    /// Payments left before the limit.
    pub fn remaining_payments(&self) -> Option<u32> {
        self.max_payments
            .map(|max| max.saturating_sub(self.payments_made))
    }

    /// Active, scheduled at or before `now`, and below the payment limit.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active
            && self.remaining_payments() != Some(0)
            && self.next_payment_date.is_some_and(|next| next <= now)
    }

    /// `amount × max_payments` with `decimals` places, or `"Recurring"`.
    pub fn total_cost_text(&self, decimals: u32) -> String {
        match self.max_payments.and_then(|max| self.amount.checked_mul(max)) {
            Some(total) => total.to_display(decimals),
            None => "Recurring".to_string(),
        }
    }

    /// Human-readable status.
    pub fn status_message(&self) -> &'static str {
        self.status.message()
    }
}

/// Result of a lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleResult {
    pub success: bool,
    pub message: String,
}

impl LifecycleResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn refused(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// In-memory registry of subscription projections.
///
/// # Thread Safety
///
/// Backed by a `RwLock`; a poisoned lock is recovered.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    views: RwLock<HashMap<SubscriptionId, SubscriptionView>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from a snapshot.
    pub fn from_views(views: impl IntoIterator<Item = SubscriptionView>) -> Self {
        let views = views.into_iter().map(|v| (v.id.clone(), v)).collect();
        Self {
            views: RwLock::new(views),
        }
    }

    /// All views, oldest first.
    pub fn snapshot(&self) -> Vec<SubscriptionView> {
        let views = self.views.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = views.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    /// Record a completed issuance. Recording the same subscription twice
    /// keeps the first projection.
    pub fn record_issued(&self, receipt: &IssuanceReceipt) -> SubscriptionView {
        let mut views = self.views.write().unwrap_or_else(|e| e.into_inner());
        views
            .entry(receipt.subscription_id.clone())
            .or_insert_with(|| SubscriptionView::from_receipt(receipt))
            .clone()
    }

    /// Look up one subscription.
    pub fn get_subscription(&self, id: &SubscriptionId) -> Option<SubscriptionView> {
        let views = self.views.read().unwrap_or_else(|e| e.into_inner());
        views.get(id).cloned()
    }

    /// Subscriptions where `account` is subscriber or merchant.
    pub fn list_for_account(&self, account: &AccountId) -> Vec<SubscriptionView> {
        self.snapshot()
            .into_iter()
            .filter(|v| &v.subscriber == account || &v.merchant == account)
            .collect()
    }

    /// Active subscriptions of `account`.
    pub fn active_for_account(&self, account: &AccountId) -> Vec<SubscriptionView> {
        self.list_for_account(account)
            .into_iter()
            .filter(|v| v.status == SubscriptionStatus::Active)
            .collect()
    }

    /// Stop charging until resumed.
    pub fn pause(&self, id: &SubscriptionId) -> LifecycleResult {
        self.transition(id, |view| match view.status {
            SubscriptionStatus::Active => {
                view.status = SubscriptionStatus::Paused;
                LifecycleResult::ok("Subscription paused")
            }
            other => LifecycleResult::refused(format!("Cannot pause a {} subscription", other)),
        })
    }

    /// Resume a paused subscription. A payment missed while paused is due at once.
    pub fn resume(&self, id: &SubscriptionId) -> LifecycleResult {
        self.transition(id, |view| match view.status {
            SubscriptionStatus::Paused => {
                view.status = SubscriptionStatus::Active;
                LifecycleResult::ok("Subscription resumed")
            }
            other => LifecycleResult::refused(format!("Cannot resume a {} subscription", other)),
        })
    }

    /// Cancel for good. The on-ledger key keeps its remaining allowance
    /// until the subscriber revokes it; custody stops charging.
    pub fn cancel(&self, id: &SubscriptionId) -> LifecycleResult {
        self.transition(id, |view| match view.status {
            SubscriptionStatus::Canceled => {
                LifecycleResult::refused("Subscription is already canceled")
            }
            _ => {
                view.status = SubscriptionStatus::Canceled;
                view.next_payment_date = None;
                LifecycleResult::ok("Subscription canceled")
            }
        })
    }

    /// Subscriptions due at `now`.
    pub fn due_subscriptions(&self, now: DateTime<Utc>) -> Vec<SubscriptionView> {
        self.snapshot()
            .into_iter()
            .filter(|v| v.is_due(now))
            .collect()
    }

    /// Book a successful charge and schedule the next one.
    pub fn record_payment(
        &self,
        id: &SubscriptionId,
        at: DateTime<Utc>,
        transaction_id: Option<TransactionId>,
    ) -> Result<SubscriptionView, SubscriptionError> {
        let mut views = self.views.write().unwrap_or_else(|e| e.into_inner());
        let view = views
            .get_mut(id)
            .ok_or_else(|| SubscriptionError::NotFound(id.to_string()))?;

        if view.remaining_payments() == Some(0) {
            return Err(SubscriptionError::LimitExceeded);
        }
        view.payments_made = view
            .payments_made
            .checked_add(1)
            .ok_or(SubscriptionError::Overflow)?;
        view.last_payment_date = Some(at);
        view.next_payment_date = if view.remaining_payments() == Some(0) {
            None
        } else {
            let scheduled = view.next_payment_date.unwrap_or(at);
            view.frequency.next_after(scheduled)
        };
        view.payment_history.push(PaymentRecord {
            payment_number: view.payments_made,
            success: true,
            transaction_id,
            amount: view.amount,
            timestamp: at,
            error: None,
        });
        Ok(view.clone())
    }

    /// Note a charge attempt that did not go through. The schedule is unchanged.
    pub fn record_failed_charge(&self, id: &SubscriptionId, at: DateTime<Utc>, reason: &str) {
        let mut views = self.views.write().unwrap_or_else(|e| e.into_inner());
        if let Some(view) = views.get_mut(id) {
            view.payment_history.push(PaymentRecord {
                payment_number: view.payments_made.saturating_add(1),
                success: false,
                transaction_id: None,
                amount: view.amount,
                timestamp: at,
                error: Some(reason.to_string()),
            });
        }
    }

    /// Charge attempts of one subscription, oldest first.
    pub fn payment_history(&self, id: &SubscriptionId) -> Vec<PaymentRecord> {
        let views = self.views.read().unwrap_or_else(|e| e.into_inner());
        views
            .get(id)
            .map(|view| view.payment_history.clone())
            .unwrap_or_default()
    }

    /// Stop charging after an unrecoverable charge error.
    pub fn mark_failed(&self, id: &SubscriptionId, reason: &str) -> LifecycleResult {
        tracing::warn!(subscription = %id, reason, "subscription failed");
        self.transition(id, |view| {
            view.status = SubscriptionStatus::Failed;
            view.next_payment_date = None;
            LifecycleResult::ok(reason.to_string())
        })
    }

    fn transition(
        &self,
        id: &SubscriptionId,
        apply: impl FnOnce(&mut SubscriptionView) -> LifecycleResult,
    ) -> LifecycleResult {
        let mut views = self.views.write().unwrap_or_else(|e| e.into_inner());
        match views.get_mut(id) {
            Some(view) => apply(view),
            None => LifecycleResult::refused(format!("Subscription {} not found", id)),
        }
    }
}
