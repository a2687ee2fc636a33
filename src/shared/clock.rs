//! Wall-clock helpers
//!
//! Timestamps are Unix epoch milliseconds throughout the crate so they
//! serialize cleanly and compare across components.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds
///
/// A clock set before the epoch yields 0 rather than an error; callers only
/// use the value for ordering and windowing.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "System clock is before the Unix epoch");
            0
        })
}
