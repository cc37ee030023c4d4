//! Time-related utilities. Room lifetimes are expressed in unix seconds.

use chrono::{DateTime, Utc};

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Convert unix seconds into a UTC datetime. `None` when out of chrono's range.
pub fn unix_to_datetime(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
}

/// Convert unix seconds to RFC 3339, falling back to the raw number when out of range.
pub fn unix_to_rfc3339(seconds: i64) -> String {
    match unix_to_datetime(seconds) {
        Some(dt) => dt.to_rfc3339(),
        None => seconds.to_string(),
    }
}
