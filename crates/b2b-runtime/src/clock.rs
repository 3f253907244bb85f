//! Monotonic clock used for diagnostics
//!
//! Timestamps in log lines (for example the stop record of a list session)
//! are relative to the first use of this clock in the process:
//! - Monotonic (always increases)
//! - Unaffected by system clock changes (NTP, manual adjustments)
//! - Small enough to store in an `AtomicU64`

use std::sync::OnceLock;
use std::time::Instant;

/// Global anchor point, set once on first access
static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Microseconds since the clock anchor
pub fn monotonic_micros() -> u64 {
    let start = PROCESS_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// Milliseconds since the clock anchor
pub fn monotonic_millis() -> u64 {
    monotonic_micros() / 1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_monotonic_time_always_increases() {
        let t1 = monotonic_micros();
        thread::sleep(Duration::from_millis(10));
        let t2 = monotonic_micros();

        assert!(t2 > t1, "Monotonic time should always increase");
        assert!(t2 - t1 >= 10_000);
    }

    #[test]
    fn test_millis_tracks_micros() {
        let us = monotonic_micros();
        let ms = monotonic_millis();
        assert!(ms >= us / 1000);
    }

    #[test]
    fn test_monotonic_never_decreases() {
        let mut last = monotonic_micros();

        for _ in 0..100 {
            thread::sleep(Duration::from_micros(100));
            let current = monotonic_micros();
            assert!(
                current >= last,
                "Monotonic time should never decrease (current={}, last={})",
                current,
                last
            );
            last = current;
        }
    }
}
