//! Wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
///
/// A clock set before 1970 reads as zero rather than failing.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Convert a millisecond span into fractional hours.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn ms_to_hours(ms: u128) -> f64 {
    ms as f64 / 3_600_000.0
}
