//! Wallet Signing Gateway.
//!
//! The protocol core only depends on [`WalletSigningGateway`]. Backends are
//! interchangeable: an in-process ledger wallet for tests and demos, a
//! hosted wallet reached over HTTP, and a selector that routes to whichever
//! backend the subscriber picked.
//!
//! A request can be withdrawn through
//! [`WalletSigningGateway::cancel_signature`]; the backend then settles the
//! outstanding request with its final outcome.

mod http;
mod local;
mod pending;
mod selector;
mod traits;

pub use http::HttpWalletGateway;
pub use local::{Approval, Approver, LocalLedgerWallet};
pub use selector::WalletSelector;
pub use traits::WalletSigningGateway;

pub(crate) use pending::PendingRequests;
