//! Billing frequencies.

use crate::SubscriptionError;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Recurrence unit governing when a charge may be executed.
///
/// Serialized with the uppercase wire names (`"MONTHLY"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BillingFrequency {
    Minute,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingFrequency {
    /// All recognized frequencies, shortest first.
    pub const ALL: [BillingFrequency; 7] = [
        Self::Minute,
        Self::Hourly,
        Self::Daily,
        Self::Weekly,
        Self::Monthly,
        Self::Quarterly,
        Self::Yearly,
    ];

    /// Length of one billing period. Months are 30 days, quarters 90, years 365.
    pub fn period(&self) -> TimeDelta {
        match self {
            Self::Minute => TimeDelta::minutes(1),
            Self::Hourly => TimeDelta::hours(1),
            Self::Daily => TimeDelta::days(1),
            Self::Weekly => TimeDelta::weeks(1),
            Self::Monthly => TimeDelta::days(30),
            Self::Quarterly => TimeDelta::days(90),
            Self::Yearly => TimeDelta::days(365),
        }
    }

    /// Period length in seconds.
    pub fn period_secs(&self) -> i64 {
        self.period().num_seconds()
    }

    /// The moment one period after `from`, `None` past the end of time.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        from.checked_add_signed(self.period())
    }

    /// Unit label used in prices ("$19.99 / month").
    pub fn label(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hourly => "hour",
            Self::Daily => "day",
            Self::Weekly => "week",
            Self::Monthly => "month",
            Self::Quarterly => "quarter",
            Self::Yearly => "year",
        }
    }

    /// Uppercase wire name.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Minute => "MINUTE",
            Self::Hourly => "HOURLY",
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::Quarterly => "QUARTERLY",
            Self::Yearly => "YEARLY",
        }
    }
}

impl fmt::Display for BillingFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl FromStr for BillingFrequency {
    type Err = SubscriptionError;

    /// Accepts wire names and unit labels in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.as_wire().eq_ignore_ascii_case(needle) || f.label().eq_ignore_ascii_case(needle))
            .ok_or_else(|| {
                SubscriptionError::InvalidArgument(format!("unknown billing frequency '{}'", s))
            })
    }
}
