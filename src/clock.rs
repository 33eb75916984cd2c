//! Clock abstraction (§6: "ClockSource (optional, for test determinism)").
//!
//! Components that need wall-clock time for TTLs/rotation (C6's DEK/KEK, C3's
//! dedup window, C8's breaker backoff) take `&dyn ClockSource` rather than
//! calling `SystemTime::now()` directly, so tests can advance time
//! deterministically instead of sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Supplies wall-clock and monotonic time to the core.
pub trait ClockSource: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_epoch_ms(&self) -> i64;
    /// An arbitrary monotonically increasing nanosecond counter.
    fn monotonic_nanos(&self) -> u64;
}

/// The real, OS-backed clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_epoch_ms(&self) -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
    }

    fn monotonic_nanos(&self) -> u64 {
        // std has no direct monotonic-epoch API; a process-local Instant-relative
        // counter is sufficient for the core's internal ordering needs.
        use std::time::Instant;
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}

/// A fake clock for deterministic tests: starts at a fixed instant and only
/// advances when told to.
#[derive(Debug)]
pub struct FakeClock {
    epoch_ms: AtomicI64,
    nanos: AtomicI64,
}

impl FakeClock {
    pub fn new(start_epoch_ms: i64) -> Self {
        Self { epoch_ms: AtomicI64::new(start_epoch_ms), nanos: AtomicI64::new(0) }
    }

    pub fn advance_ms(&self, delta: i64) {
        self.epoch_ms.fetch_add(delta, Ordering::SeqCst);
        self.nanos.fetch_add(delta * 1_000_000, Ordering::SeqCst);
    }
}

impl ClockSource for FakeClock {
    fn now_epoch_ms(&self) -> i64 {
        self.epoch_ms.load(Ordering::SeqCst)
    }

    fn monotonic_nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_on_demand() {
        let clock = FakeClock::new(1_000);
        assert_eq!(clock.now_epoch_ms(), 1_000);
        clock.advance_ms(500);
        assert_eq!(clock.now_epoch_ms(), 1_500);
    }
}
