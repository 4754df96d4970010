//! Smoke tests for pingpay-demo-cli
//!
//! Run the compiled binary against a temporary storage directory. Only the
//! local ledger and in-memory custody are used, so no network is needed.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn pingpay(storage: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pingpay-demo"))
        .args(args)
        .env("PINGPAY_DEMO_DIR", storage)
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute pingpay-demo")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn combined(output: &Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

fn saved_ids(storage: &Path) -> Vec<String> {
    let path = storage.join("subscriptions.json");
    if !path.exists() {
        return Vec::new();
    }
    let views: Vec<serde_json::Value> =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    views
        .iter()
        .map(|v| v["id"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_cli_help() {
    let temp = TempDir::new().unwrap();
    let output = pingpay(temp.path(), &["--help"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("checkout"));
    assert!(text.contains("subscriptions"));
}

#[test]
fn test_cli_list_empty() {
    let temp = TempDir::new().unwrap();
    let output = pingpay(temp.path(), &["subscriptions"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("No subscriptions found"));
}

#[test]
fn test_checkout_with_charges() {
    let temp = TempDir::new().unwrap();
    let output = pingpay(
        temp.path(),
        &[
            "checkout",
            "--price",
            "19.99",
            "--max-payments",
            "3",
            "--charges",
            "5",
        ],
    );
    let text = combined(&output);
    assert!(output.status.success(), "{}", text);
    assert!(text.contains("Subscribed: sub_"));
    assert!(text.contains("Payment #3"));
    assert!(!text.contains("Payment #4"));
    assert!(text.contains("59.97"));

    let ids = saved_ids(temp.path());
    assert_eq!(ids.len(), 1);

    let status = pingpay(temp.path(), &["status", &ids[0]]);
    assert!(status.status.success());
    let status = stdout(&status);
    assert!(status.contains("3/3"));
    assert!(status.contains("Payment #1"));
    assert!(status.contains("Payment #3"));
}

#[test]
fn test_no_limit_requires_policy() {
    let temp = TempDir::new().unwrap();
    let refused = pingpay(temp.path(), &["checkout", "--price", "5", "--no-limit"]);
    assert!(!refused.status.success());
    assert!(combined(&refused).contains("invalid intent"));
    assert!(saved_ids(temp.path()).is_empty());

    let config = pingpay(temp.path(), &["config", "allow-no-limit", "true"]);
    assert!(config.status.success());

    let accepted = pingpay(temp.path(), &["checkout", "--price", "5", "--no-limit"]);
    let text = combined(&accepted);
    assert!(accepted.status.success(), "{}", text);
    assert!(text.contains("Allowance: unlimited"));
    assert_eq!(saved_ids(temp.path()).len(), 1);
}

#[test]
fn test_declined_checkout_saves_nothing() {
    let temp = TempDir::new().unwrap();
    let output = pingpay(
        temp.path(),
        &["checkout", "--price", "1.00", "--max-payments", "1", "--decline"],
    );
    assert!(!output.status.success());
    assert!(combined(&output).contains("cancelled"));
    assert!(saved_ids(temp.path()).is_empty());
}

#[test]
fn test_lifecycle_commands() {
    let temp = TempDir::new().unwrap();
    let checkout = pingpay(
        temp.path(),
        &["checkout", "--price", "2.50", "--max-payments", "12", "--frequency", "weekly"],
    );
    assert!(checkout.status.success(), "{}", combined(&checkout));
    let id = saved_ids(temp.path()).remove(0);

    let paused = pingpay(temp.path(), &["pause", &id]);
    assert!(paused.status.success());
    assert!(stdout(&paused).contains("paused"));

    // pausing twice is refused
    assert!(!pingpay(temp.path(), &["pause", &id]).status.success());

    assert!(pingpay(temp.path(), &["resume", &id]).status.success());
    assert!(pingpay(temp.path(), &["cancel", &id]).status.success());

    let active = pingpay(temp.path(), &["subscriptions", "--active"]);
    assert!(stdout(&active).contains("No subscriptions found"));
}

#[test]
fn test_insecure_custody_refused() {
    let temp = TempDir::new().unwrap();
    let output = pingpay(
        temp.path(),
        &["config", "set-custody", "http://custody.example.com", "--token", "t"],
    );
    assert!(!output.status.success());

    let show = pingpay(temp.path(), &["config", "show"]);
    assert!(stdout(&show).contains("in-memory custody"));
}
