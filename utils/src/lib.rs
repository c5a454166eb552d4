use std::time::Duration;
#[cfg(not(test))]
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(test)]
use mock_instant::global::{SystemTime, UNIX_EPOCH};

/// Get the elapsed system time since the Unix Epoch in Milliseconds
pub fn get_epoch_time_in_ms() -> u64 {
    get_epoch_time().as_millis() as u64
}

// A clock set before 1970 reads as the epoch itself.
fn get_epoch_time() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

/// Returns `now` unless the previous timestamp is ahead of it, so timestamps
/// handed out for the same record never move backwards.
pub fn monotonic_since(previous: u64, now: u64) -> u64 {
    previous.max(now)
}
