//! Retry backoff shared by wrappers

/// Maximum backoff duration in milliseconds (30 seconds)
///
/// Prevents unbounded sleep from exponential overflow. With base=100ms:
/// - Attempt 9 would be 25.6 seconds (under cap)
/// - Attempt 10 would be 51.2 seconds (capped to 30s)
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Calculate exponential backoff with overflow protection
///
/// Returns `base_ms * 2^(attempt-1)`, capped at [`MAX_BACKOFF_MS`].
/// Attempt numbers are 1-indexed; attempt 0 is treated as 1.
///
/// # Examples
/// With base=100ms:
/// - Attempt 1: 100ms
/// - Attempt 2: 200ms
/// - Attempt 3: 400ms
/// - Attempt 10+: 30,000ms (capped)
pub fn calculate_backoff(base_ms: u64, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1);
    base_ms
        .saturating_mul(2_u64.saturating_pow(exponent))
        .min(MAX_BACKOFF_MS)
}
