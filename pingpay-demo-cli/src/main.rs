//! PingPay Demo CLI
//!
//! Command-line interface for walking through subscription key issuance,
//! escrow and scheduled charges.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod store;
mod ui;

#[derive(Parser)]
#[command(name = "pingpay-demo")]
#[command(about = "PingPay Demo CLI - Issue and manage ledger-native subscriptions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Custom storage directory
    #[arg(long, global = true, env = "PINGPAY_DEMO_DIR")]
    storage_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to a plan: sign the scoped key grant and escrow the key
    Checkout(commands::checkout::CheckoutArgs),

    /// List subscriptions
    Subscriptions {
        /// Only subscriptions of this account (subscriber or merchant)
        #[arg(long)]
        account: Option<String>,

        /// Only active subscriptions
        #[arg(long)]
        active: bool,
    },

    /// Show one subscription
    Status {
        /// Subscription ID
        id: String,
    },

    /// Pause a subscription
    Pause {
        /// Subscription ID
        id: String,
    },

    /// Resume a paused subscription
    Resume {
        /// Subscription ID
        id: String,
    },

    /// Cancel a subscription
    Cancel {
        /// Subscription ID
        id: String,
    },

    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the current configuration
    Show,

    /// Use a hosted wallet gateway for signatures
    SetWallet {
        /// Gateway base URL
        url: String,

        /// API key sent as X-Api-Key
        #[arg(long)]
        api_key: Option<String>,

        /// Seconds to wait for the subscriber's approval
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Use a remote custody service for escrow
    SetCustody {
        /// Custody base URL (https, or http on loopback)
        url: String,

        /// Bearer token
        #[arg(long)]
        token: String,

        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Allow or refuse subscriptions without a payment limit
    AllowNoLimit {
        /// true or false
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },

    /// Forget remote endpoints and use the local ledger and custody
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("pingpay_demo_cli=debug,pingpay_lib=debug,pingpay_subscriptions=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("pingpay_demo_cli=info,pingpay_lib=warn,pingpay_subscriptions=warn")
            .init();
    }

    let storage_dir = cli.storage_dir.unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pingpay-demo")
    });

    match cli.command {
        Commands::Checkout(args) => {
            commands::checkout::run(&storage_dir, args, cli.verbose).await?;
        }
        Commands::Subscriptions { account, active } => {
            commands::subscriptions::list(&storage_dir, account.as_deref(), active)?;
        }
        Commands::Status { id } => {
            commands::subscriptions::status(&storage_dir, &id)?;
        }
        Commands::Pause { id } => {
            commands::subscriptions::pause(&storage_dir, &id)?;
        }
        Commands::Resume { id } => {
            commands::subscriptions::resume(&storage_dir, &id)?;
        }
        Commands::Cancel { id } => {
            commands::subscriptions::cancel(&storage_dir, &id)?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show(&storage_dir)?,
            ConfigAction::SetWallet {
                url,
                api_key,
                timeout,
            } => commands::config::set_wallet(&storage_dir, &url, api_key, timeout)?,
            ConfigAction::SetCustody {
                url,
                token,
                timeout,
            } => commands::config::set_custody(&storage_dir, &url, &token, timeout)?,
            ConfigAction::AllowNoLimit { enabled } => {
                commands::config::allow_no_limit(&storage_dir, enabled)?
            }
            ConfigAction::Clear => commands::config::clear(&storage_dir)?,
        },
    }

    Ok(())
}
