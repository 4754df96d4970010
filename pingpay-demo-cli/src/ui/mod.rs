//! Terminal UI utilities

use colored::Colorize;
use console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use pingpay_subscriptions::{IssuanceState, StateChange, SubscriptionStatus};
use std::time::Duration;

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print a section header
pub fn header(text: &str) {
    println!("\n{}", text.bold().underline());
}

/// Print a key-value pair
pub fn key_value(key: &str, value: &str) {
    println!("  {}: {}", key.cyan(), value);
}

/// Create a spinner progress indicator
pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Prompt for user confirmation
pub fn confirm(prompt: &str, default: bool) -> anyhow::Result<bool> {
    use dialoguer::Confirm;
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()?)
}

/// Whether stdout is an interactive terminal
pub fn is_interactive() -> bool {
    Term::stdout().is_term()
}

/// Print a separator line
pub fn separator() {
    println!("{}", "─".repeat(60).dimmed());
}

/// Print JSON prettily
pub fn json(value: &serde_json::Value) {
    if let Ok(pretty) = serde_json::to_string_pretty(value) {
        println!("{}", pretty);
    }
}

/// One line per issuance state change
pub fn state_change(change: &StateChange) {
    let label = change.to.to_string();
    let label = match change.to {
        IssuanceState::Complete => label.green().bold(),
        IssuanceState::Failed(kind) if kind.is_terminal() => label.red().bold(),
        IssuanceState::Failed(_) => label.yellow().bold(),
        _ => label.normal(),
    };
    match &change.detail {
        Some(detail) => println!("  {} {} ({})", "→".dimmed(), label, detail.dimmed()),
        None => println!("  {} {}", "→".dimmed(), label),
    }
}

/// Colored subscription status
pub fn status(status: SubscriptionStatus) -> String {
    let text = status.to_string();
    match status {
        SubscriptionStatus::Active => text.green().to_string(),
        SubscriptionStatus::Paused => text.yellow().to_string(),
        SubscriptionStatus::Canceled => text.dimmed().to_string(),
        SubscriptionStatus::Failed => text.red().to_string(),
    }
}
