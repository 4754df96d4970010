//! Demo configuration stored as `pingpay.json` in the storage directory.

use anyhow::{Context, Result};
use pingpay_lib::config::{CustodyConfig, WalletGatewayConfig};
use pingpay_lib::retry::RetryConfig;
use pingpay_subscriptions::IssuancePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "pingpay.json";

/// Endpoints and switches for the demo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Hosted wallet gateway; the local ledger wallet is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<WalletGatewayConfig>,
    /// Remote custody; in-memory custody is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custody: Option<CustodyConfig>,
    #[serde(default)]
    pub policy: IssuancePolicy,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl DemoConfig {
    fn path(storage_dir: &Path) -> PathBuf {
        storage_dir.join(CONFIG_FILE)
    }

    /// Load the configuration, or the defaults if none was saved.
    pub fn load(storage_dir: &Path) -> Result<Self> {
        let path = Self::path(storage_dir);
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&path).context("Failed to read demo configuration")?;
        serde_json::from_str(&contents).context("Failed to parse demo configuration")
    }

    /// Save the configuration.
    pub fn save(&self, storage_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(storage_dir)?;
        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize demo configuration")?;
        std::fs::write(Self::path(storage_dir), contents)
            .context("Failed to write demo configuration")?;
        Ok(())
    }

    /// Whether both collaborators are local, so charges can be simulated.
    pub fn is_local(&self) -> bool {
        self.wallet.is_none() && self.custody.is_none()
    }
}
