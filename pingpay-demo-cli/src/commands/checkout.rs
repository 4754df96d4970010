//! Checkout: issue a subscription key, escrow it, optionally run charges
//!
//! By default the flow runs against an in-process ledger and in-memory
//! custody. Configured endpoints (`config set-wallet`, `config set-custody`)
//! replace either side.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use pingpay_lib::encryption::{generate_master_key, EscrowCipher};
use pingpay_lib::escrow::{EscrowRegistrationClient, HttpCustodyClient};
use pingpay_lib::ledger::LocalLedger;
use pingpay_lib::wallet::{Approval, Approver, HttpWalletGateway, LocalLedgerWallet, WalletSelector};
use pingpay_lib::{AccountId, Amount, ScopedKeyPair};
use pingpay_subscriptions::{
    cancel_pair, BillingFrequency, InMemoryCustodyService, IssuanceError, IssuanceOrchestrator,
    IssuanceReceipt, SubscriptionIntent, SubscriptionRegistry,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{print_view, DISPLAY_DECIMALS};
use crate::config::DemoConfig;
use crate::{store, ui};

/// Escrow resumes attempted before giving up.
const RESUME_ATTEMPTS: u32 = 2;

#[derive(Args, Debug)]
pub struct CheckoutArgs {
    /// Plan identifier
    #[arg(long, default_value = "pro-monthly")]
    pub plan: String,

    /// Price per period in display units (e.g. 19.99)
    #[arg(long)]
    pub price: String,

    /// Decimal places between display units and the smallest unit
    #[arg(long, default_value_t = DISPLAY_DECIMALS)]
    pub decimals: u32,

    /// Billing frequency (minute, hourly, daily, weekly, monthly, quarterly, yearly)
    #[arg(long, default_value = "monthly")]
    pub frequency: BillingFrequency,

    /// Number of payments the key may make
    #[arg(long, conflicts_with = "no_limit")]
    pub max_payments: Option<u32>,

    /// Confirm an open-ended subscription with an unlimited allowance
    #[arg(long)]
    pub no_limit: bool,

    /// Subscriber account
    #[arg(long, default_value = "subscriber.near")]
    pub subscriber: String,

    /// Merchant account
    #[arg(long, default_value = "merchant.near")]
    pub merchant: String,

    /// Starting balance of the local subscriber, in smallest units
    #[arg(long, default_value_t = 1_000_000)]
    pub balance: u64,

    /// Local wallet: close the signature prompt instead of signing
    #[arg(long, conflicts_with = "prompt")]
    pub decline: bool,

    /// Local wallet: ask before signing
    #[arg(long)]
    pub prompt: bool,

    /// Simulate this many billing periods of charges (local mode only)
    #[arg(long, default_value_t = 0)]
    pub charges: u32,

    /// Run the custody worker for this many seconds (local mode only)
    #[arg(long)]
    pub monitor_secs: Option<u64>,

    /// Print the receipt as JSON
    #[arg(long)]
    pub json: bool,
}

/// Local side of the demo: the ledger and the in-memory custody.
struct LocalSide {
    ledger: Arc<LocalLedger>,
    custody: Arc<InMemoryCustodyService>,
}

fn parse_account(label: &str, value: &str) -> Result<AccountId> {
    value
        .parse()
        .map_err(|e| anyhow!("Invalid {} account '{}': {}", label, value, e))
}

fn approver(args: &CheckoutArgs) -> Approver {
    if args.decline {
        Arc::new(|_| Approval::Cancel)
    } else if args.prompt {
        Arc::new(|tx| {
            let prompt = format!(
                "Authorize a key for {} with allowance {}?",
                tx.receiver_account(),
                tx.action().allowance()
            );
            match ui::confirm(&prompt, true) {
                Ok(true) => Approval::Approve,
                Ok(false) => Approval::Cancel,
                // closed terminal or interrupted prompt
                Err(e) => {
                    tracing::debug!(error = %e, "prompt abandoned");
                    Approval::Cancel
                }
            }
        })
    } else {
        Arc::new(|_| Approval::Approve)
    }
}

/// Run a checkout
#[tracing::instrument(skip(storage_dir, args), fields(plan = %args.plan))]
pub async fn run(storage_dir: &Path, args: CheckoutArgs, verbose: bool) -> Result<()> {
    let config = DemoConfig::load(storage_dir)?;
    let subscriber = parse_account("subscriber", &args.subscriber)?;
    let merchant = parse_account("merchant", &args.merchant)?;
    let unit_amount = Amount::from_display(&args.price, args.decimals)
        .map_err(|e| anyhow!("Invalid price '{}': {}", args.price, e))?;

    let mut intent = SubscriptionIntent::new(
        subscriber.clone(),
        merchant.clone(),
        args.plan.as_str(),
        unit_amount,
        args.frequency,
    );
    if let Some(max) = args.max_payments {
        intent = intent.with_max_payments(max);
    }
    if args.no_limit {
        intent = intent.confirm_no_limit();
    }

    ui::header("Checkout");
    ui::key_value("Plan", &args.plan);
    ui::key_value(
        "Price",
        &format!(
            "{} / {}",
            unit_amount.to_display(args.decimals),
            args.frequency.label()
        ),
    );
    ui::key_value("Subscriber", subscriber.as_str());
    ui::key_value("Merchant", merchant.as_str());
    match intent.max_payments {
        Some(max) => {
            let total = intent
                .total_allowance()
                .map_err(|e| anyhow!("{}", e))?;
            ui::key_value(
                "Allowance",
                &format!("{} ({} payments)", total.to_display(args.decimals), max),
            );
        }
        None => {
            ui::key_value("Allowance", "Recurring");
            if args.no_limit {
                ui::warning("No payment limit: the merchant key will have an unlimited allowance.");
            }
        }
    }

    // Local ledger with a funded subscriber
    let ledger = Arc::new(LocalLedger::new());
    let subscriber_key = ScopedKeyPair::generate();
    ledger
        .create_account(
            subscriber.clone(),
            subscriber_key.public_key(),
            Amount::from_units(args.balance),
        )
        .context("Failed to create subscriber account")?;
    ledger
        .create_account(
            merchant.clone(),
            ScopedKeyPair::generate().public_key(),
            Amount::zero(),
        )
        .context("Failed to create merchant account")?;

    let local_wallet = LocalLedgerWallet::new(ledger.clone(), approver(&args));
    local_wallet.add_signer(subscriber.clone(), subscriber_key.into_secret());

    let wallets = WalletSelector::new();
    wallets.register(Arc::new(local_wallet));
    if let Some(wallet_config) = &config.wallet {
        let hosted = HttpWalletGateway::new(wallet_config.clone())
            .context("Failed to create wallet gateway client")?;
        wallets.register(Arc::new(hosted));
        wallets.select("hosted")?;
    }
    ui::key_value("Wallet", &wallets.selected().unwrap_or_default());

    // the merchant runs its own charge worker
    let custody = Arc::new(
        InMemoryCustodyService::new(EscrowCipher::new(generate_master_key()))
            .with_worker(merchant.clone()),
    );
    let escrow: Arc<dyn EscrowRegistrationClient> = match &config.custody {
        Some(custody_config) => Arc::new(
            HttpCustodyClient::new(custody_config.clone())
                .context("Failed to create custody client")?,
        ),
        None => custody.clone(),
    };
    ui::key_value(
        "Custody",
        config
            .custody
            .as_ref()
            .map(|c| c.url.as_str())
            .unwrap_or("in-memory"),
    );

    let registry = Arc::new(store::load(storage_dir)?);
    let orchestrator = IssuanceOrchestrator::new(Arc::new(wallets), escrow)
        .with_policy(config.policy.clone())
        .with_retry(config.retry.clone())
        .with_registry(registry.clone());
    orchestrator.on_state_change(Arc::new(ui::state_change));

    // Ctrl-C cancels while the wallet prompt is open
    let (cancel, signal) = cancel_pair();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    ui::separator();
    let mut outcome = orchestrator.issue(intent, signal).await;
    let mut resumes = 0;
    let outcome = loop {
        match outcome {
            Err(IssuanceError::EscrowIncomplete { pending, reason }) if resumes < RESUME_ATTEMPTS => {
                resumes += 1;
                ui::warning(&format!(
                    "Escrow incomplete ({}). Resuming, attempt {}/{}",
                    reason, resumes, RESUME_ATTEMPTS
                ));
                outcome = orchestrator.resume(*pending).await;
            }
            other => break other,
        }
    };
    ctrl_c.abort();
    ui::separator();

    let receipt = match outcome {
        Ok(receipt) => receipt,
        Err(err) => {
            explain_failure(&err);
            return Err(anyhow::Error::new(err).context("Checkout failed"));
        }
    };
    store::save(storage_dir, &registry)?;
    print_receipt(&receipt, &args, verbose, &custody)?;

    let local = LocalSide { ledger, custody };
    if args.charges > 0 || args.monitor_secs.is_some() {
        if !config.is_local() {
            ui::warning("Charges can only be simulated with the local wallet and custody.");
            return Ok(());
        }
        let verified = local
            .custody
            .register_worker(local.ledger.as_ref())
            .await
            .context("Failed to register the custody worker")?;
        if !verified {
            ui::warning("The custody worker account does not exist on the ledger.");
            return Ok(());
        }
        if args.charges > 0 {
            simulate_charges(&local, &registry, &receipt, args.charges).await;
        }
        if let Some(secs) = args.monitor_secs {
            monitor(&local, &registry, secs).await;
        }
        store::save(storage_dir, &registry)?;

        ui::header("Balances");
        for account in [&subscriber, &merchant] {
            let balance = local.ledger.balance(account)?;
            ui::key_value(account.as_str(), &balance.to_display(args.decimals));
        }
    }

    Ok(())
}

fn explain_failure(err: &IssuanceError) {
    ui::error(&err.to_string());
    match err {
        IssuanceError::InvalidIntent(_) => {
            ui::info("Nothing was sent to the wallet. Fix the input and try again.")
        }
        IssuanceError::UserCancelled => ui::info("No key was authorized."),
        IssuanceError::Network(_) => {
            ui::info("The wallet did not authorize the key. Start a new checkout.")
        }
        IssuanceError::EscrowIncomplete { pending, .. } => ui::warning(&format!(
            "The key for {} is authorized on-ledger but custody does not hold it. Revoke it in your wallet.",
            pending.subscription_id()
        )),
        IssuanceError::RegistrationRejected(_) => ui::warning(
            "The merchant refused the key. Revoke it in your wallet before subscribing again.",
        ),
    }
}

fn print_receipt(
    receipt: &IssuanceReceipt,
    args: &CheckoutArgs,
    verbose: bool,
    custody: &InMemoryCustodyService,
) -> Result<()> {
    if args.json {
        ui::json(&serde_json::to_value(receipt)?);
        return Ok(());
    }

    ui::success(&format!("Subscribed: {}", receipt.subscription_id));
    ui::key_value("Scoped key", &receipt.public_key.to_string());
    ui::key_value("Transaction", receipt.transaction_id.as_str());
    ui::key_value("Allowance", &receipt.allowance.to_string());
    if verbose {
        if let Some(record) = custody.record(&receipt.subscription_id) {
            ui::key_value(
                "Escrow record",
                &format!("{} bytes sealed", record.private_key_ciphertext.len()),
            );
        }
    }
    Ok(())
}

/// Walk the schedule forward, charging each due period.
async fn simulate_charges(
    local: &LocalSide,
    registry: &SubscriptionRegistry,
    receipt: &IssuanceReceipt,
    periods: u32,
) {
    ui::header("Charges");
    let mut now = receipt.completed_at;
    for _ in 0..periods {
        let run = match local
            .custody
            .execute_due_charges(registry, local.ledger.as_ref(), now)
            .await
        {
            Ok(run) => run,
            Err(e) => {
                ui::error(&e.to_string());
                return;
            }
        };
        for charge in &run.executed {
            ui::success(&format!(
                "Payment #{} of {} on {} ({})",
                charge.payment_number,
                charge.amount.to_display(DISPLAY_DECIMALS),
                now.format("%Y-%m-%d"),
                charge
                    .transaction_id
                    .as_ref()
                    .map_or("reconciled", |id| id.as_str())
            ));
        }
        for failed in &run.failed {
            ui::warning(&format!("Charge failed: {}", failed.reason));
        }

        match registry
            .get_subscription(&receipt.subscription_id)
            .and_then(|view| view.next_payment_date)
        {
            Some(next) => now = next,
            None => {
                ui::info("No further payments scheduled.");
                break;
            }
        }
    }

    if let Some(view) = registry.get_subscription(&receipt.subscription_id) {
        ui::separator();
        print_view(&view);
    }
}

/// Run the background worker for `secs` seconds.
async fn monitor(local: &LocalSide, registry: &Arc<SubscriptionRegistry>, secs: u64) {
    match local
        .custody
        .start_monitoring(registry.clone(), local.ledger.clone(), Duration::from_secs(1))
    {
        Ok(true) => {}
        Ok(false) => {
            ui::warning("Custody monitoring is already running.");
            return;
        }
        Err(e) => {
            ui::error(&e.to_string());
            return;
        }
    }

    let spinner = ui::spinner(&format!("Custody worker running for {}s", secs));
    tokio::time::sleep(Duration::from_secs(secs)).await;
    local.custody.stop_monitoring().await;
    spinner.finish_and_clear();

    let status = local.custody.monitoring_status();
    ui::header("Custody worker");
    if let Some(worker) = local.custody.worker_address() {
        ui::key_value("Worker", worker.as_str());
    }
    ui::key_value("Charges executed", &status.charges_executed.to_string());
    ui::key_value("Charges failed", &status.charges_failed.to_string());
    if let Some(last) = status.last_run {
        ui::key_value("Last run", &last.format("%H:%M:%S UTC").to_string());
    }
}
