//! Key Issuance Request Builder.
//!
//! Pure: no I/O, no randomness. The caller generates the scoped key pair and
//! passes the public half in.

use crate::error::IssuanceError;
use crate::intent::{IssuancePolicy, SubscriptionIntent};
use pingpay_lib::transaction::CHARGE_METHOD;
use pingpay_lib::{Allowance, AuthorizationAction, PublicKey, UnsignedAuthorizationTransaction};

/// Build the scoped-key grant for `intent`.
///
/// The allowance is `unit_amount × max_payments`. An intent without
/// `max_payments` is only accepted when the policy allows unlimited grants
/// AND the subscriber confirmed it; the grant is then
/// [`Allowance::Unlimited`]. It is never silently narrowed to one period.
///
/// ```
/// use pingpay_lib::{Amount, ScopedKeyPair};
/// use pingpay_subscriptions::{build_authorization, BillingFrequency, IssuancePolicy, SubscriptionIntent};
///
/// let intent = SubscriptionIntent::new(
///     "alice.near".parse().unwrap(),
///     "merchant.near".parse().unwrap(),
///     "pro",
///     Amount::from_units(100),
///     BillingFrequency::Monthly,
/// )
/// .with_max_payments(12);
///
/// let key = ScopedKeyPair::generate();
/// let tx = build_authorization(&intent, &IssuancePolicy::strict(), key.public_key()).unwrap();
/// assert_eq!(tx.action().allowance().limit(), Some(Amount::from_units(1200)));
/// ```
pub fn build_authorization(
    intent: &SubscriptionIntent,
    policy: &IssuancePolicy,
    public_key: PublicKey,
) -> Result<UnsignedAuthorizationTransaction, IssuanceError> {
    intent.validate()?;

    let allowance = match intent.max_payments {
        Some(_) => Allowance::Limited(intent.total_allowance()?),
        None if !policy.allow_no_limit => {
            return Err(IssuanceError::InvalidIntent(
                "max_payments is required: unlimited subscriptions are disabled by policy".into(),
            ))
        }
        None if !intent.no_limit_confirmed => {
            return Err(IssuanceError::InvalidIntent(
                "max_payments is required unless the subscriber confirms no limit".into(),
            ))
        }
        None => Allowance::Unlimited,
    };

    Ok(UnsignedAuthorizationTransaction::new(
        intent.subscriber.clone(),
        intent.merchant.clone(),
        AuthorizationAction::AddScopedKey {
            public_key,
            allowed_contract: intent.merchant.clone(),
            allowed_methods: vec![CHARGE_METHOD.to_string()],
            allowance,
        },
    ))
}
