// A simple module to define the time types used in the project

use std::time::{SystemTime, UNIX_EPOCH, Duration};

// Seconds timestamps used to determine it using its type
pub type TimestampSeconds = u64;

#[inline]
pub fn get_current_time() -> Duration {
    // A clock set before the epoch is reported as the epoch itself
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

// return timestamp in seconds
pub fn get_current_time_in_seconds() -> TimestampSeconds {
    get_current_time().as_secs()
}

// Chain block times are signed unix seconds, negative values are clamped
pub fn block_time_to_seconds(block_time: i64) -> TimestampSeconds {
    block_time.max(0) as TimestampSeconds
}
