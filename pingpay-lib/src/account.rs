//! Ledger account identifiers.

use crate::{PingPayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum length of an account name.
pub const MIN_ACCOUNT_LEN: usize = 2;

/// Maximum length of an account name.
pub const MAX_ACCOUNT_LEN: usize = 64;

/// A validated ledger account name (e.g. `alice.near`, `merchant-1.testnet`).
///
/// Account names are 2..=64 characters of lowercase ASCII letters and digits,
/// separated by single `-`, `_` or `.` characters. A separator may not lead,
/// trail, or follow another separator.
///
/// # Example
///
/// ```
/// use pingpay_lib::AccountId;
///
/// let account: AccountId = "alice.near".parse().unwrap();
/// assert_eq!(account.as_str(), "alice.near");
/// assert!("Alice.near".parse::<AccountId>().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Validate and wrap an account name.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Get the account name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<()> {
        if id.len() < MIN_ACCOUNT_LEN || id.len() > MAX_ACCOUNT_LEN {
            return Err(PingPayError::invalid_data(
                "account_id",
                format!(
                    "length must be {}..={} characters, got {}",
                    MIN_ACCOUNT_LEN,
                    MAX_ACCOUNT_LEN,
                    id.len()
                ),
            ));
        }

        let mut last_was_separator = true;
        for c in id.chars() {
            let is_separator = matches!(c, '-' | '_' | '.');
            if is_separator {
                if last_was_separator {
                    return Err(PingPayError::invalid_data(
                        "account_id",
                        format!("misplaced separator in '{}'", id),
                    ));
                }
            } else if !(c.is_ascii_lowercase() || c.is_ascii_digit()) {
                return Err(PingPayError::invalid_data(
                    "account_id",
                    format!("invalid character '{}' in '{}'", c, id),
                ));
            }
            last_was_separator = is_separator;
        }

        if last_was_separator {
            return Err(PingPayError::invalid_data(
                "account_id",
                format!("'{}' ends with a separator", id),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountId {
    type Err = PingPayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for AccountId {
    type Error = PingPayError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
