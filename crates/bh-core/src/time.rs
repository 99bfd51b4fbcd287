//! Wall-clock helpers for keepalive timestamps

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in milliseconds, or 0 if the clock is before the epoch.
///
/// # Examples
/// ```
/// use bh_core::time::current_time_millis;
///
/// assert!(current_time_millis() > 0);
/// ```
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
