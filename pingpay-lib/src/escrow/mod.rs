//! Escrow Registration Client.
//!
//! After the grant is on-ledger the scoped key is registered with the
//! merchant side, then the private half is deposited with the custody tier.
//! Both calls are idempotent for the same `(subscription_id, public_key)`.

mod http;

pub use http::HttpCustodyClient;

use crate::{AccountId, PublicKey, Result, SecretKey, SubscriptionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Acknowledgement returned by both escrow calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EscrowAck {
    /// A positive acknowledgement.
    pub fn accepted() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    /// A refusal with a reason.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Result of [`EscrowRegistrationClient::register_key`].
pub type RegistrationResult = EscrowAck;

/// Result of [`EscrowRegistrationClient::deposit_private_key`].
pub type DepositResult = EscrowAck;

/// Client for the merchant registration and key custody endpoints.
///
/// `Ok` with `success == false` is a refusal by the remote side. `Err` means
/// the call did not complete and may be retried when
/// [`is_retryable`](crate::PingPayError::is_retryable) says so.
#[async_trait]
pub trait EscrowRegistrationClient: Send + Sync {
    /// Announce that `public_key` may charge `merchant_account` for this subscription.
    async fn register_key(
        &self,
        subscription_id: &SubscriptionId,
        public_key: &PublicKey,
        merchant_account: &AccountId,
    ) -> Result<RegistrationResult>;

    /// Hand the private key to custody. Only valid after a successful registration.
    async fn deposit_private_key(
        &self,
        subscription_id: &SubscriptionId,
        private_key: &SecretKey,
        public_key: &PublicKey,
    ) -> Result<DepositResult>;
}
