//! Clock-sync service: tracks the adapter's estimate of venue time and
//! produces a monotonically non-decreasing `stamp_ms` for signed
//! requests.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

fn wall_clock_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

/// Tracks `offset_ms` (venue time minus local wall clock) and hands out
/// `stamp_ms` values that never go backwards within one process, even if
/// the offset estimate is revised downward or the wall clock itself
/// jumps backwards (NTP step).
pub struct ClockSync {
    offset_ms: AtomicI64,
    max_abs_offset_ms: i64,
    last_stamp: Mutex<i64>,
}

impl ClockSync {
    pub fn new(max_abs_offset_ms: i64) -> Self {
        Self {
            offset_ms: AtomicI64::new(0),
            max_abs_offset_ms,
            last_stamp: Mutex::new(0),
        }
    }

    /// Record a fresh offset observation (e.g. from a server-time
    /// endpoint round trip), clamped to `|offset| <= max_abs_offset_ms`.
    pub fn observe_offset(&self, venue_time_ms: i64, local_time_ms: i64) {
        let raw = venue_time_ms - local_time_ms;
        let clamped = raw.clamp(-self.max_abs_offset_ms, self.max_abs_offset_ms);
        self.offset_ms.store(clamped, Ordering::Release);
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Acquire)
    }

    /// Produce the next `stamp_ms` for a signed request: the current
    /// estimated venue time, but never smaller than the previous stamp
    /// handed out by this process.
    pub fn stamp_ms(&self) -> i64 {
        let candidate = wall_clock_ms() + self.offset_ms();
        let mut last = self.last_stamp.lock();
        let stamp = candidate.max(*last + 1);
        *last = stamp;
        stamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_offset_clamps_to_max_abs() {
        let clock = ClockSync::new(1_000);
        clock.observe_offset(10_000, 0);
        assert_eq!(clock.offset_ms(), 1_000);

        clock.observe_offset(-10_000, 0);
        assert_eq!(clock.offset_ms(), -1_000);
    }

    #[test]
    fn stamp_ms_is_monotonic_even_if_offset_decreases() {
        let clock = ClockSync::new(5_000);
        clock.observe_offset(5_000, 0);
        let first = clock.stamp_ms();

        clock.observe_offset(0, 100_000);
        let second = clock.stamp_ms();
        assert!(second > first);
    }

    #[test]
    fn repeated_calls_strictly_increase() {
        let clock = ClockSync::new(5_000);
        let mut last = 0;
        for _ in 0..50 {
            let s = clock.stamp_ms();
            assert!(s > last);
            last = s;
        }
    }
}
