//! Monotonic millisecond clock shared by the scheduler and the timer index

use std::sync::OnceLock;
use std::time::Instant;

static START_INSTANT: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since the first call in this process. Never goes backwards.
#[inline]
pub fn now_ms() -> u64 {
    START_INSTANT.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// Deadline `ms` from now, saturating at `u64::MAX`.
#[inline]
pub fn deadline_after(ms: u64) -> u64 {
    now_ms().saturating_add(ms)
}
