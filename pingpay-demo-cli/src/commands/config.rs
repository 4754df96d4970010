//! Configuration commands
//!
//! Point the demo at a hosted wallet or remote custody, or back at the
//! local ledger and in-memory custody.

use anyhow::{Context, Result};
use pingpay_lib::config::{CustodyConfig, WalletGatewayConfig};
use std::path::Path;

use crate::config::DemoConfig;
use crate::ui;

/// Show the current configuration
pub fn show(storage_dir: &Path) -> Result<()> {
    let config = DemoConfig::load(storage_dir)?;

    ui::header("Configuration");
    ui::key_value("Storage", &storage_dir.display().to_string());
    match &config.wallet {
        Some(wallet) => ui::key_value(
            "Wallet",
            &format!("hosted gateway at {} (timeout {}s)", wallet.url, wallet.timeout_secs),
        ),
        None => ui::key_value("Wallet", "local ledger wallet"),
    }
    match &config.custody {
        Some(custody) => ui::key_value(
            "Custody",
            &format!("{} (timeout {}s)", custody.url, custody.timeout_secs),
        ),
        None => ui::key_value("Custody", "in-memory custody"),
    }
    ui::key_value(
        "Unlimited subscriptions",
        if config.policy.allow_no_limit {
            "allowed with subscriber confirmation"
        } else {
            "refused"
        },
    );
    ui::key_value(
        "Escrow retries",
        &format!(
            "{} attempts, {}ms initial delay",
            config.retry.max_attempts, config.retry.initial_delay_ms
        ),
    );
    Ok(())
}

/// Use a hosted wallet gateway
pub fn set_wallet(
    storage_dir: &Path,
    url: &str,
    api_key: Option<String>,
    timeout: Option<u64>,
) -> Result<()> {
    let mut wallet = WalletGatewayConfig::new(url);
    if let Some(key) = api_key {
        wallet = wallet.with_api_key(key);
    }
    if let Some(secs) = timeout {
        wallet = wallet.with_timeout(secs);
    }

    let mut config = DemoConfig::load(storage_dir)?;
    config.wallet = Some(wallet);
    config.save(storage_dir)?;

    ui::success(&format!("Wallet gateway set to {}", url));
    Ok(())
}

/// Use a remote custody service
pub fn set_custody(
    storage_dir: &Path,
    url: &str,
    token: &str,
    timeout: Option<u64>,
) -> Result<()> {
    let mut custody = CustodyConfig::new(url, token);
    if let Some(secs) = timeout {
        custody = custody.with_timeout(secs);
    }
    custody
        .validate()
        .context("Custody endpoint must use https (http is only accepted on loopback)")?;

    let mut config = DemoConfig::load(storage_dir)?;
    config.custody = Some(custody);
    config.save(storage_dir)?;

    ui::success(&format!("Custody set to {}", url));
    Ok(())
}

/// Toggle unlimited subscriptions
pub fn allow_no_limit(storage_dir: &Path, enabled: bool) -> Result<()> {
    let mut config = DemoConfig::load(storage_dir)?;
    config.policy = config.policy.with_allow_no_limit(enabled);
    config.save(storage_dir)?;

    if enabled {
        ui::warning("Subscriptions without a payment limit are allowed when the subscriber confirms them.");
    } else {
        ui::success("Subscriptions must set --max-payments.");
    }
    Ok(())
}

/// Forget remote endpoints
pub fn clear(storage_dir: &Path) -> Result<()> {
    let mut config = DemoConfig::load(storage_dir)?;
    config.wallet = None;
    config.custody = None;
    config.save(storage_dir)?;

    ui::success("Using the local ledger wallet and in-memory custody.");
    Ok(())
}
