//! Conversions between optional expiry instants and the ledger's unix-second
//! encoding, where `0` means "no expiry".

use chrono::{DateTime, Utc};

/// Encode an optional expiry as unix seconds. `None` and pre-epoch instants
/// encode as `0`.
pub fn to_unix_seconds(instant: Option<DateTime<Utc>>) -> u64 {
    instant
        .map(|t| u64::try_from(t.timestamp()).unwrap_or(0))
        .unwrap_or(0)
}

/// Decode a ledger expiry. `0` decodes as `None`.
pub fn from_unix_seconds(secs: u64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
}
