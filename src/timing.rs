//! Centralized timing utilities.
//!
//! Wraps `std::time` so production code and tests share one clock surface.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Start a timer. Returns the current instant.
#[inline]
pub fn start_timer() -> Instant {
    Instant::now()
}

/// Elapsed milliseconds since `start`.
#[inline]
pub fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Current wall-clock time as milliseconds since the Unix epoch.
#[inline]
pub fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
