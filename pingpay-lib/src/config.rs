//! Endpoint configuration for the hosted wallet and the custody service.

use crate::{PingPayError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a hosted wallet gateway.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalletGatewayConfig {
    /// Base URL of the wallet service (e.g. "https://wallet.example.com").
    pub url: String,

    /// How long to wait for the subscriber to approve, in seconds.
    #[serde(default = "default_approval_timeout")]
    pub timeout_secs: u64,

    /// Optional API key sent as `X-Api-Key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_approval_timeout() -> u64 {
    300
}

impl WalletGatewayConfig {
    /// Create a new wallet gateway configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_secs: default_approval_timeout(),
            api_key: None,
        }
    }

    /// Set the approval timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Configuration for the custody (escrow) service.
#[derive(Clone, Serialize, Deserialize)]
pub struct CustodyConfig {
    /// Base URL of the custody service. Must be `https` outside loopback.
    pub url: String,

    /// Bearer token authenticating this client to the custody service.
    pub auth_token: String,

    /// Request timeout in seconds.
    #[serde(default = "default_custody_timeout")]
    pub timeout_secs: u64,
}

fn default_custody_timeout() -> u64 {
    30
}

impl CustodyConfig {
    /// Create a new custody configuration.
    pub fn new(url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: auth_token.into(),
            timeout_secs: default_custody_timeout(),
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Check the configuration is safe to send key material over.
    pub fn validate(&self) -> Result<()> {
        validate_secure_url(&self.url)?;
        if self.auth_token.trim().is_empty() {
            return Err(PingPayError::Auth(
                "custody auth token must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CustodyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustodyConfig")
            .field("url", &self.url)
            .field("auth_token", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn split_url(url: &str) -> Result<(String, &str)> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| PingPayError::invalid_data("url", format!("'{}' has no scheme", url)))?;

    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split(']').next().unwrap_or_default()
    } else {
        authority.split(':').next().unwrap_or_default()
    };
    if host.is_empty() {
        return Err(PingPayError::invalid_data("url", format!("'{}' has no host", url)));
    }
    Ok((scheme.to_ascii_lowercase(), host))
}

fn is_loopback_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

/// Plain `http` to a loopback host.
pub fn is_loopback_http(url: &str) -> bool {
    split_url(url).is_ok_and(|(scheme, host)| scheme == "http" && is_loopback_host(host))
}

/// Require `https`, allowing plain `http` only for loopback hosts.
pub fn validate_secure_url(url: &str) -> Result<()> {
    let (scheme, host) = split_url(url)?;
    match scheme.as_str() {
        "https" => Ok(()),
        "http" if is_loopback_host(host) => Ok(()),
        "http" => Err(PingPayError::InsecureChannel(format!(
            "refusing plain http to {}",
            host
        ))),
        other => Err(PingPayError::invalid_data(
            "url",
            format!("unsupported scheme '{}'", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_config_defaults() {
        let config: WalletGatewayConfig =
            serde_json::from_str(r#"{"url": "https://wallet.example.com"}"#).unwrap();
        assert_eq!(config.timeout_secs, 300);
        assert!(config.api_key.is_none());

        let config = WalletGatewayConfig::new("https://w").with_timeout(5).with_api_key("k");
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_secure_url_rules() {
        assert!(validate_secure_url("https://custody.example.com").is_ok());
        assert!(validate_secure_url("HTTPS://custody.example.com/v1").is_ok());
        assert!(validate_secure_url("http://localhost:8080").is_ok());
        assert!(validate_secure_url("http://127.0.0.1:3000/api").is_ok());
        assert!(validate_secure_url("http://[::1]:3000").is_ok());

        assert!(matches!(
            validate_secure_url("http://custody.example.com"),
            Err(PingPayError::InsecureChannel(_))
        ));
        assert!(matches!(
            validate_secure_url("http://localhost.evil.com"),
            Err(PingPayError::InsecureChannel(_))
        ));
        assert!(validate_secure_url("ftp://custody.example.com").is_err());
        assert!(validate_secure_url("custody.example.com").is_err());
        assert!(validate_secure_url("https://").is_err());
    }

    #[test]
    fn test_loopback_http_detection() {
        assert!(is_loopback_http("http://localhost:8080"));
        assert!(is_loopback_http("HTTP://[::1]:3000/v1"));
        assert!(!is_loopback_http("http://custody.example.com"));
        assert!(!is_loopback_http("http://localhost.evil.com"));
        assert!(!is_loopback_http("https://localhost"));
        assert!(!is_loopback_http("localhost"));
    }

    #[test]
    fn test_custody_config_validation_and_redaction() {
        let config = CustodyConfig::new("https://custody.example.com", "secret-token");
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout_secs, 30);
        assert!(!format!("{:?}", config).contains("secret-token"));

        assert!(CustodyConfig::new("https://c", " ").validate().is_err());
        assert!(CustodyConfig::new("http://c.example.com", "t").validate().is_err());
    }
}
