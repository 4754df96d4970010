//! Subscription listing and lifecycle commands

use anyhow::{anyhow, Result};
use pingpay_lib::AccountId;
use pingpay_subscriptions::LifecycleResult;
use std::path::Path;

use super::print_view;
use crate::{store, ui};

/// List saved subscriptions
#[tracing::instrument(skip(storage_dir))]
pub fn list(storage_dir: &Path, account: Option<&str>, active_only: bool) -> Result<()> {
    let registry = store::load(storage_dir)?;

    ui::header("Subscriptions");

    let views = match account {
        Some(account) => {
            let account: AccountId = account
                .parse()
                .map_err(|e| anyhow!("Invalid account '{}': {}", account, e))?;
            if active_only {
                registry.active_for_account(&account)
            } else {
                registry.list_for_account(&account)
            }
        }
        None => registry
            .snapshot()
            .into_iter()
            .filter(|v| !active_only || v.status == pingpay_subscriptions::SubscriptionStatus::Active)
            .collect(),
    };

    if views.is_empty() {
        ui::info("No subscriptions found.");
        ui::info("Use 'pingpay-demo checkout --price 19.99 --max-payments 12' to create one.");
        return Ok(());
    }

    for view in &views {
        ui::separator();
        print_view(view);
    }
    ui::separator();
    ui::info(&format!("{} subscription(s)", views.len()));
    Ok(())
}

/// Show one subscription
pub fn status(storage_dir: &Path, id: &str) -> Result<()> {
    let registry = store::load(storage_dir)?;
    let id = store::parse_id(id)?;
    let view = registry
        .get_subscription(&id)
        .ok_or_else(|| anyhow!("Subscription {} not found", id))?;

    ui::header("Subscription");
    print_view(&view);
    Ok(())
}

/// Pause a subscription
pub fn pause(storage_dir: &Path, id: &str) -> Result<()> {
    lifecycle(storage_dir, id, |registry, id| registry.pause(id))
}

/// Resume a subscription
pub fn resume(storage_dir: &Path, id: &str) -> Result<()> {
    lifecycle(storage_dir, id, |registry, id| registry.resume(id))
}

/// Cancel a subscription
pub fn cancel(storage_dir: &Path, id: &str) -> Result<()> {
    if ui::is_interactive()
        && !ui::confirm("Cancel this subscription? This cannot be undone.", false)?
    {
        ui::info("Cancelled");
        return Ok(());
    }
    lifecycle(storage_dir, id, |registry, id| registry.cancel(id))?;
    ui::info("Revoke the scoped key in your wallet to release the remaining allowance.");
    Ok(())
}

fn lifecycle(
    storage_dir: &Path,
    id: &str,
    apply: impl FnOnce(
        &pingpay_subscriptions::SubscriptionRegistry,
        &pingpay_lib::SubscriptionId,
    ) -> LifecycleResult,
) -> Result<()> {
    let registry = store::load(storage_dir)?;
    let id = store::parse_id(id)?;

    let result = apply(&registry, &id);
    if !result.success {
        return Err(anyhow!(result.message));
    }

    store::save(storage_dir, &registry)?;
    tracing::info!(subscription = %id, "{}", result.message);
    ui::success(&result.message);
    if let Some(view) = registry.get_subscription(&id) {
        ui::info(view.status_message());
    }
    Ok(())
}
