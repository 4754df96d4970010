//! Test doubles for the wallet and escrow collaborators.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pingpay_lib::test_utils::{RecordingEscrow, ScriptedWallet, TestLedger};
//!
//! let wallet = ScriptedWallet::approving();
//! let escrow = RecordingEscrow::new();
//! escrow.fail_next_deposit(PingPayError::Transport("reset".into()));
//! ```

mod collaborators;
mod fixtures;

pub use collaborators::{EscrowCall, RecordingEscrow, ScriptedWallet, WalletScript};
pub use fixtures::{test_account, TestLedger};
