use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Ledger-controlled lifecycle state of a registered document.
///
/// Only these three values are ever written to the ledger or the index.
/// `expired` and `notfound` are derived at read time, see [`DerivedStatus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Registered and in force.
    Active,
    /// Refused by an authorised reviewer.
    Rejected,
    /// Withdrawn from use without being rejected.
    Inactive,
}

impl Status {
    /// Every storable status, in ledger code order.
    pub const ALL: [Status; 3] = [Status::Active, Status::Rejected, Status::Inactive];

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Rejected => "rejected",
            Self::Inactive => "inactive",
        }
    }

    /// Whether `self -> next` is a forward lifecycle step.
    ///
    /// `active` may move to `rejected` or `inactive`. Nothing else is a
    /// forward step; returning to `active` is a reversal.
    pub fn can_transition_to(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Active, Status::Rejected) | (Status::Active, Status::Inactive)
        )
    }

    /// Whether `self -> next` returns a withdrawn document to `active`.
    pub fn is_reversal(&self, next: Status) -> bool {
        next == Status::Active && *self != Status::Active
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = TypeError;

    /// Strict parse: exact lowercase names only.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "rejected" => Ok(Self::Rejected),
            "inactive" => Ok(Self::Inactive),
            other => Err(TypeError::InvalidStatus(other.to_string())),
        }
    }
}

/// Status reported to readers after merging ledger state with the clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivedStatus {
    Active,
    Rejected,
    Inactive,
    /// The entry's `validTo` has elapsed. Never persisted.
    Expired,
    /// The ledger has no entry for this CID.
    NotFound,
}

impl DerivedStatus {
    /// Derive a reader-facing status from a ledger entry.
    ///
    /// `exists = false` wins over everything. Otherwise an elapsed
    /// `valid_to` wins over the stored status.
    pub fn from_ledger(
        exists: bool,
        stored: Status,
        valid_to: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        if !exists {
            return Self::NotFound;
        }
        match valid_to {
            Some(expiry) if now > expiry => Self::Expired,
            _ => stored.into(),
        }
    }

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Rejected => "rejected",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
            Self::NotFound => "notfound",
        }
    }
}

impl From<Status> for DerivedStatus {
    fn from(status: Status) -> Self {
        match status {
            Status::Active => Self::Active,
            Status::Rejected => Self::Rejected,
            Status::Inactive => Self::Inactive,
        }
    }
}

impl fmt::Display for DerivedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
