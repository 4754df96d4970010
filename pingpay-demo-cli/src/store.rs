//! Subscription projections persisted between runs.

use anyhow::{anyhow, Context, Result};
use pingpay_lib::SubscriptionId;
use pingpay_subscriptions::{SubscriptionRegistry, SubscriptionView};
use std::path::{Path, PathBuf};

const SUBSCRIPTIONS_FILE: &str = "subscriptions.json";

fn path(storage_dir: &Path) -> PathBuf {
    storage_dir.join(SUBSCRIPTIONS_FILE)
}

/// Load the saved projections into a registry.
pub fn load(storage_dir: &Path) -> Result<SubscriptionRegistry> {
    let path = path(storage_dir);
    if !path.exists() {
        return Ok(SubscriptionRegistry::new());
    }

    let contents = std::fs::read_to_string(&path).context("Failed to read subscriptions")?;
    let views: Vec<SubscriptionView> =
        serde_json::from_str(&contents).context("Failed to parse subscriptions")?;
    Ok(SubscriptionRegistry::from_views(views))
}

/// Write the registry back.
pub fn save(storage_dir: &Path, registry: &SubscriptionRegistry) -> Result<()> {
    std::fs::create_dir_all(storage_dir)?;
    let contents = serde_json::to_string_pretty(&registry.snapshot())
        .context("Failed to serialize subscriptions")?;
    std::fs::write(path(storage_dir), contents).context("Failed to write subscriptions")?;
    Ok(())
}

/// Parse a subscription id given on the command line.
pub fn parse_id(id: &str) -> Result<SubscriptionId> {
    id.parse()
        .map_err(|e| anyhow!("Invalid subscription ID '{}': {}", id, e))
}
