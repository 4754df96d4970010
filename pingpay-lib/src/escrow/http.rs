//! HTTP client for a remote custody service.
//!
//! ```text
//! POST {url}/v1/subscriptions/{id}/keys     { "public_key", "merchant_account" }
//! POST {url}/v1/subscriptions/{id}/escrow   { "public_key", "private_key" }
//! Authorization: Bearer <token>
//! ```
//!
//! The base URL must be `https` (plain `http` is accepted for loopback
//! hosts only). 409 and 422 responses are refusals, not transport failures.
//!
//! # Feature Flags
//!
//! Requires the `http-client` feature. Without it every request returns
//! [`PingPayError::Unimplemented`].

use super::{DepositResult, EscrowRegistrationClient, RegistrationResult};
use crate::config::CustodyConfig;
use crate::{AccountId, PingPayError, PublicKey, Result, SecretKey, SubscriptionId};
use async_trait::async_trait;
#[cfg(feature = "http-client")]
use super::EscrowAck;
#[cfg(feature = "http-client")]
use crate::config::is_loopback_http;
#[cfg(feature = "http-client")]
use std::time::Duration;

/// Custody client speaking JSON over HTTPS.
pub struct HttpCustodyClient {
    config: CustodyConfig,
    #[cfg(feature = "http-client")]
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpCustodyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCustodyClient")
            .field("config", &self.config)
            .finish()
    }
}

impl HttpCustodyClient {
    /// Create a client. Fails with `InsecureChannel` for a non-https URL.
    #[cfg(feature = "http-client")]
    pub fn new(config: CustodyConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .https_only(!is_loopback_http(&config.url))
            .build()
            .map_err(|e| PingPayError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    /// Create a client (stub when feature disabled).
    #[cfg(not(feature = "http-client"))]
    pub fn new(config: CustodyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Get the configuration.
    pub fn config(&self) -> &CustodyConfig {
        &self.config
    }

    #[cfg(any(feature = "http-client", test))]
    fn url(&self, subscription_id: &SubscriptionId, leaf: &str) -> String {
        format!(
            "{}/v1/subscriptions/{}/{}",
            self.config.url.trim_end_matches('/'),
            subscription_id,
            leaf
        )
    }

    #[cfg(feature = "http-client")]
    async fn post<B: serde::Serialize + ?Sized>(
        &self,
        url: String,
        operation: &str,
        body: &B,
    ) -> Result<EscrowAck> {
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.auth_token)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(operation, e))?;

        let status = response.status();
        if status.is_success() {
            return response.json::<EscrowAck>().await.map_err(|e| {
                PingPayError::Serialization(format!("Failed to parse custody response: {}", e))
            });
        }

        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            409 | 422 => Ok(EscrowAck::rejected(refusal_message(&body, status.as_u16()))),
            code => Err(self.map_status_error(operation, code, &body)),
        }
    }

    #[cfg(feature = "http-client")]
    fn map_status_error(&self, operation: &str, status: u16, body: &str) -> PingPayError {
        match status {
            401 | 403 => PingPayError::Auth(format!("custody refused credentials ({})", status)),
            404 => PingPayError::not_found("custody endpoint", operation),
            429 => PingPayError::RateLimited {
                retry_after_ms: 5000,
            },
            500..=599 => PingPayError::Transport(format!(
                "custody server error during {} ({}): {}",
                operation, status, body
            )),
            _ => PingPayError::Transport(format!(
                "custody {} failed ({}): {}",
                operation, status, body
            )),
        }
    }

    #[cfg(feature = "http-client")]
    fn map_reqwest_error(&self, operation: &str, e: reqwest::Error) -> PingPayError {
        if e.is_timeout() {
            PingPayError::ConnectionTimeout {
                operation: format!("custody {}", operation),
                timeout_ms: self.config.timeout_secs * 1000,
            }
        } else if e.is_connect() {
            PingPayError::ConnectionFailed {
                target: self.config.url.clone(),
                reason: e.to_string(),
            }
        } else {
            PingPayError::Transport(format!("custody {} failed: {}", operation, e))
        }
    }
}

#[cfg(feature = "http-client")]
fn refusal_message(body: &str, status: u16) -> String {
    serde_json::from_str::<EscrowAck>(body)
        .ok()
        .and_then(|ack| ack.message)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("refused with status {}", status)
            } else {
                body.trim().to_string()
            }
        })
}

#[async_trait]
impl EscrowRegistrationClient for HttpCustodyClient {
    #[cfg(feature = "http-client")]
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), fields(subscription = %subscription_id)))]
    async fn register_key(
        &self,
        subscription_id: &SubscriptionId,
        public_key: &PublicKey,
        merchant_account: &AccountId,
    ) -> Result<RegistrationResult> {
        #[derive(serde::Serialize)]
        struct RegisterBody<'a> {
            public_key: &'a PublicKey,
            merchant_account: &'a AccountId,
        }

        self.post(
            self.url(subscription_id, "keys"),
            "registration",
            &RegisterBody {
                public_key,
                merchant_account,
            },
        )
        .await
    }

    #[cfg(feature = "http-client")]
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, private_key), fields(subscription = %subscription_id)))]
    async fn deposit_private_key(
        &self,
        subscription_id: &SubscriptionId,
        private_key: &SecretKey,
        public_key: &PublicKey,
    ) -> Result<DepositResult> {
        #[derive(serde::Serialize)]
        struct DepositBody<'a> {
            public_key: &'a PublicKey,
            private_key: &'a str,
        }

        if private_key.public_key() != *public_key {
            return Err(PingPayError::invalid_data(
                "private_key",
                "does not match the registered public key",
            ));
        }

        let encoded = zeroize::Zeroizing::new(private_key.expose_hex());
        self.post(
            self.url(subscription_id, "escrow"),
            "deposit",
            &DepositBody {
                public_key,
                private_key: encoded.as_str(),
            },
        )
        .await
    }

    #[cfg(not(feature = "http-client"))]
    async fn register_key(
        &self,
        _subscription_id: &SubscriptionId,
        _public_key: &PublicKey,
        _merchant_account: &AccountId,
    ) -> Result<RegistrationResult> {
        Err(PingPayError::Unimplemented(
            "Custody client not compiled - enable the 'http-client' feature",
        ))
    }

    #[cfg(not(feature = "http-client"))]
    async fn deposit_private_key(
        &self,
        _subscription_id: &SubscriptionId,
        _private_key: &SecretKey,
        _public_key: &PublicKey,
    ) -> Result<DepositResult> {
        Err(PingPayError::Unimplemented(
            "Custody client not compiled - enable the 'http-client' feature",
        ))
    }
}
