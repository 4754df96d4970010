//! Hosted wallet reached over HTTP(S).
//!
//! The wallet service shows the transaction to the subscriber and answers
//! once they approve, cancel, or the ledger rejects the grant:
//!
//! ```text
//! POST {url}/v1/transactions/sign
//! { "transaction": { ...UnsignedAuthorizationTransaction... } }
//!
//! 200 { "succeeded": true, "transaction_id": "<hex>" }
//! 200 { "succeeded": false, "error_detail": "UserCancelled" }
//!
//! POST {url}/v1/transactions/{transaction_id}/cancel
//! 202 (withdrawn) | 404 (not outstanding) | 409 (already answered)
//! ```
//!
//! A cancel only asks the service to withdraw the prompt. The open sign
//! request still returns the final outcome.
//!
//! # Feature Flags
//!
//! Requires the `http-client` feature. Without it every request returns
//! [`PingPayError::Unimplemented`].

use super::WalletSigningGateway;
use crate::config::WalletGatewayConfig;
use crate::{
    PingPayError, Result, TransactionId, TransactionOutcome, UnsignedAuthorizationTransaction,
};
use async_trait::async_trait;
#[cfg(feature = "http-client")]
use std::time::Duration;

/// Wallet gateway backed by a hosted wallet service.
pub struct HttpWalletGateway {
    config: WalletGatewayConfig,
    #[cfg(feature = "http-client")]
    client: reqwest::Client,
}

impl HttpWalletGateway {
    /// Create a gateway with the given configuration.
    #[cfg(feature = "http-client")]
    pub fn new(config: WalletGatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PingPayError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    /// Create a gateway with the given configuration (stub when feature disabled).
    #[cfg(not(feature = "http-client"))]
    pub fn new(config: WalletGatewayConfig) -> Result<Self> {
        Ok(Self { config })
    }

    /// Get the configuration.
    pub fn config(&self) -> &WalletGatewayConfig {
        &self.config
    }

    #[cfg(any(feature = "http-client", test))]
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    #[cfg(feature = "http-client")]
    fn map_status_error(&self, status: u16, body: &str) -> PingPayError {
        match status {
            401 | 403 => PingPayError::Auth(format!("wallet refused credentials ({})", status)),
            404 => PingPayError::not_found("wallet endpoint", self.url("v1/transactions/sign")),
            408 | 504 => PingPayError::ConnectionTimeout {
                operation: "wallet signature".to_string(),
                timeout_ms: self.config.timeout_secs * 1000,
            },
            429 => PingPayError::RateLimited {
                retry_after_ms: 5000,
            },
            500..=599 => {
                PingPayError::Transport(format!("wallet server error ({}): {}", status, body))
            }
            _ => PingPayError::Transport(format!("wallet request failed ({}): {}", status, body)),
        }
    }

    #[cfg(feature = "http-client")]
    fn map_reqwest_error(&self, e: reqwest::Error) -> PingPayError {
        if e.is_timeout() {
            PingPayError::ConnectionTimeout {
                operation: "wallet signature".to_string(),
                timeout_ms: self.config.timeout_secs * 1000,
            }
        } else if e.is_connect() {
            PingPayError::ConnectionFailed {
                target: self.config.url.clone(),
                reason: e.to_string(),
            }
        } else {
            PingPayError::Transport(format!("wallet request failed: {}", e))
        }
    }
}

#[async_trait]
impl WalletSigningGateway for HttpWalletGateway {
    fn backend_id(&self) -> &str {
        "hosted"
    }

    #[cfg(feature = "http-client")]
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, tx), fields(signer = %tx.signer_account())))]
    async fn request_signature(
        &self,
        tx: UnsignedAuthorizationTransaction,
    ) -> Result<TransactionOutcome> {
        #[derive(serde::Serialize)]
        struct SignRequest<'a> {
            transaction: &'a UnsignedAuthorizationTransaction,
        }

        let mut request = self
            .client
            .post(self.url("v1/transactions/sign"))
            .json(&SignRequest { transaction: &tx });
        if let Some(key) = &self.config.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.map_status_error(status.as_u16(), &body));
        }

        response.json::<TransactionOutcome>().await.map_err(|e| {
            PingPayError::Serialization(format!("Failed to parse wallet response: {}", e))
        })
    }

    #[cfg(feature = "http-client")]
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), fields(transaction_id = %transaction_id)))]
    async fn cancel_signature(&self, transaction_id: &TransactionId) -> Result<()> {
        let mut request = self.client.post(self.url(&format!(
            "v1/transactions/{}/cancel",
            transaction_id.as_str()
        )));
        if let Some(key) = &self.config.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;
        match response.status().as_u16() {
            200..=299 | 404 | 409 => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(self.map_status_error(status, &body))
            }
        }
    }

    #[cfg(not(feature = "http-client"))]
    async fn cancel_signature(&self, _transaction_id: &TransactionId) -> Result<()> {
        Err(PingPayError::Unimplemented(
            "Hosted wallet client not compiled - enable the 'http-client' feature",
        ))
    }

    #[cfg(not(feature = "http-client"))]
    async fn request_signature(
        &self,
        _tx: UnsignedAuthorizationTransaction,
    ) -> Result<TransactionOutcome> {
        Err(PingPayError::Unimplemented(
            "Hosted wallet client not compiled - enable the 'http-client' feature",
        ))
    }
}
