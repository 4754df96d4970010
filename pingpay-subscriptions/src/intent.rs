//! Subscription intents and the issuance policy.

use crate::error::IssuanceError;
use crate::frequency::BillingFrequency;
use pingpay_lib::{AccountId, Amount};
use serde::{Deserialize, Serialize};

/// What a subscriber asked for at checkout.
///
/// `unit_amount` is the per-period price in the ledger's smallest unit.
/// Without `max_payments` the subscription has no end, and issuing it needs
/// `no_limit_confirmed` plus an [`IssuancePolicy`] that allows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionIntent {
    pub subscriber: AccountId,
    pub merchant: AccountId,
    pub plan_id: String,
    pub unit_amount: Amount,
    pub frequency: BillingFrequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payments: Option<u32>,
    /// The subscriber explicitly accepted an unlimited allowance.
    #[serde(default)]
    pub no_limit_confirmed: bool,
}

impl SubscriptionIntent {
    /// Create an open-ended intent; add a limit with [`with_max_payments`](Self::with_max_payments).
    pub fn new(
        subscriber: AccountId,
        merchant: AccountId,
        plan_id: impl Into<String>,
        unit_amount: Amount,
        frequency: BillingFrequency,
    ) -> Self {
        Self {
            subscriber,
            merchant,
            plan_id: plan_id.into(),
            unit_amount,
            frequency,
            max_payments: None,
            no_limit_confirmed: false,
        }
    }

    /// Cap the number of payments.
    pub fn with_max_payments(mut self, max_payments: u32) -> Self {
        self.max_payments = Some(max_payments);
        self
    }

    /// Record the subscriber's confirmation of an unlimited allowance.
    pub fn confirm_no_limit(mut self) -> Self {
        self.no_limit_confirmed = true;
        self
    }

    /// Check the local input constraints.
    pub fn validate(&self) -> Result<(), IssuanceError> {
        if self.plan_id.trim().is_empty() {
            return Err(IssuanceError::InvalidIntent("plan_id must not be empty".into()));
        }
        if !self.unit_amount.is_positive() {
            return Err(IssuanceError::InvalidIntent(
                "unit_amount must be a positive number of smallest units".into(),
            ));
        }
        if self.max_payments == Some(0) {
            return Err(IssuanceError::InvalidIntent(
                "max_payments must be at least 1".into(),
            ));
        }
        if self.subscriber == self.merchant {
            return Err(IssuanceError::InvalidIntent(
                "subscriber and merchant must differ".into(),
            ));
        }
        Ok(())
    }

    /// `unit_amount × (max_payments or 1)`.
    pub fn total_allowance(&self) -> Result<Amount, IssuanceError> {
        self.unit_amount
            .checked_mul(self.max_payments.unwrap_or(1))
            .ok_or_else(|| IssuanceError::InvalidIntent("total allowance overflows".into()))
    }
}

/// Operator-level switches for issuance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuancePolicy {
    /// Allow unlimited allowances for subscribers who confirm them.
    #[serde(default)]
    pub allow_no_limit: bool,
}

impl IssuancePolicy {
    /// Policy that refuses unlimited allowances.
    pub fn strict() -> Self {
        Self::default()
    }

    /// Set whether unlimited allowances are allowed.
    pub fn with_allow_no_limit(mut self, allow: bool) -> Self {
        self.allow_no_limit = allow;
        self
    }
}
