//! Resilient transport (C8, §4.8): circuit breaker + retry + rate limit in
//! front of a [`BrokerClient`], with an on-disk fallback for anything that
//! can't go out right now.
//!
//! Grounded on the teacher's `worker/mod.rs` orchestration style (explicit
//! state, bounded waits, check-and-react) generalized into a breaker state
//! machine — no `governor`/`backoff` crate appears anywhere in the retrieved
//! example pack, so the breaker, retry loop, and token bucket are hand-rolled
//! per §4.8/§5's own description of the algorithm.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;

use crate::broker::BrokerClient;
use crate::clock::ClockSource;
use crate::config::{BREAKER_MAX_OPEN_MS, BREAKER_SUCCESS_THRESHOLD, RETRY_DELAY_MS};
use crate::fallback::{self, FallbackStore};
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    phase: Phase,
    consecutive_failures: u32,
    consecutive_successes: u32,
    open_since_epoch_ms: i64,
    backoff_ms: u64,
    probe_in_flight: bool,
}

/// `CLOSED`/`OPEN`/`HALF_OPEN` state machine (§4.8). A single mutex guards
/// the whole struct — the critical section is a few field reads/writes,
/// matching §5's "atomic counters and a state enum under a short mutex".
struct Breaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    base_open_ms: u64,
}

impl Breaker {
    fn new(failure_threshold: u32, base_open_ms: u64) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                phase: Phase::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                open_since_epoch_ms: 0,
                backoff_ms: base_open_ms,
                probe_in_flight: false,
            }),
            failure_threshold,
            base_open_ms,
        }
    }

    /// Decides whether a call may reach the broker right now.
    fn admit(&self, now: i64) -> bool {
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::Closed => true,
            Phase::Open => {
                if now.saturating_sub(inner.open_since_epoch_ms) >= inner.backoff_ms as i64 {
                    inner.phase = Phase::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            Phase::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::Closed => inner.consecutive_failures = 0,
            Phase::HalfOpen => {
                inner.probe_in_flight = false;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= BREAKER_SUCCESS_THRESHOLD {
                    inner.phase = Phase::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.backoff_ms = self.base_open_ms;
                }
            }
            Phase::Open => {}
        }
    }

    /// Returns `true` if this failure just transitioned the breaker to `OPEN`.
    fn record_failure(&self, now: i64) -> bool {
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.phase = Phase::Open;
                    inner.open_since_epoch_ms = now;
                    inner.backoff_ms = self.base_open_ms;
                    true
                } else {
                    false
                }
            }
            Phase::HalfOpen => {
                inner.probe_in_flight = false;
                inner.phase = Phase::Open;
                inner.open_since_epoch_ms = now;
                inner.consecutive_successes = 0;
                inner.backoff_ms = (inner.backoff_ms * 2).min(BREAKER_MAX_OPEN_MS);
                true
            }
            Phase::Open => false,
        }
    }

    fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.phase = Phase::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.backoff_ms = self.base_open_ms;
        inner.probe_in_flight = false;
    }
}

struct RateLimiterState {
    tokens: f64,
    last_refill_epoch_ms: i64,
}

/// A token bucket: `capacity` tokens, refilled continuously at `rate_per_ms`.
struct RateLimiter {
    state: Mutex<RateLimiterState>,
    capacity: f64,
    rate_per_ms: f64,
    clock: Arc<dyn ClockSource>,
}

impl RateLimiter {
    fn new(rps: u32, clock: Arc<dyn ClockSource>) -> Self {
        let capacity = f64::from(rps).max(1.0);
        let now = clock.now_epoch_ms();
        Self { state: Mutex::new(RateLimiterState { tokens: capacity, last_refill_epoch_ms: now }), capacity, rate_per_ms: capacity / 1000.0, clock }
    }

    fn try_acquire(&self) -> bool {
        let now = self.clock.now_epoch_ms();
        let mut state = self.state.lock();
        let elapsed_ms = now.saturating_sub(state.last_refill_epoch_ms).max(0) as f64;
        state.tokens = (state.tokens + elapsed_ms * self.rate_per_ms).min(self.capacity);
        state.last_refill_epoch_ms = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Ties the breaker, rate limiter, broker client, and fallback store
/// together behind `send`/`send_to_fallback`/`replay_once`.
pub struct Transport {
    breaker: Breaker,
    limiter: RateLimiter,
    broker: Arc<dyn BrokerClient>,
    fallback: Arc<FallbackStore>,
    topic: String,
    max_attempts: u32,
    metrics: Arc<Metrics>,
    clock: Arc<dyn ClockSource>,
}

impl Transport {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        fallback: Arc<FallbackStore>,
        topic: String,
        max_attempts: u32,
        failure_threshold: u32,
        open_duration_ms: u64,
        rate_limit_rps: u32,
        metrics: Arc<Metrics>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            breaker: Breaker::new(failure_threshold, open_duration_ms),
            limiter: RateLimiter::new(rate_limit_rps, clock.clone()),
            broker,
            fallback,
            topic,
            max_attempts: max_attempts.max(1),
            metrics,
            clock,
        }
    }

    /// §4.8's `send(bytes)` algorithm: rate limit, then breaker-gated
    /// send-with-retries, falling back to disk on any rejection/exhaustion.
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        if !self.limiter.try_acquire() {
            self.metrics.incr_dropped_rate_limited();
            return self.send_to_fallback(bytes);
        }

        let now = self.clock.now_epoch_ms();
        if !self.breaker.admit(now) {
            return self.send_to_fallback(bytes);
        }

        for attempt in 0..self.max_attempts {
            match self.broker.send(&self.topic, bytes).await {
                Ok(()) => {
                    self.breaker.record_success();
                    self.metrics.incr_sent();
                    return Ok(());
                }
                Err(e) => {
                    if !e.is_retryable() || attempt + 1 == self.max_attempts {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
                }
            }
        }

        if self.breaker.record_failure(self.clock.now_epoch_ms()) {
            self.metrics.incr_breaker_opens();
            tracing::warn!("circuit breaker opened");
        }
        self.send_to_fallback(bytes)
    }

    /// Writes `bytes` straight to the on-disk fallback store, bypassing the
    /// broker entirely. Used both by `send`'s failure paths and by the
    /// orchestrator's stage-failure routing (§4.2).
    pub fn send_to_fallback(&self, bytes: &[u8]) -> Result<()> {
        self.fallback.write(bytes)?;
        self.metrics.incr_fallback_written();
        Ok(())
    }

    pub fn reset_circuit_breaker(&self) {
        self.breaker.reset();
    }

    /// One replay sweep: walks the fallback directory in lexicographic
    /// (== write) order, forwarding each file's bytes through the breaker.
    /// Stops at the first breaker rejection/failure so the next scheduled
    /// tick resumes where this one left off.
    pub async fn replay_once(&self) -> Result<usize> {
        let mut delivered = 0;
        for path in self.fallback.list_sorted()? {
            let Some(mut file) = fallback::try_lock_exclusive(&path)? else {
                continue;
            };
            let bytes = fallback::read_all(&mut file)?;
            if !fallback::has_valid_magic(&bytes) {
                drop(file);
                let _ = fs::remove_file(&path);
                continue;
            }

            let now = self.clock.now_epoch_ms();
            if !self.breaker.admit(now) {
                break;
            }

            match self.broker.send(&self.topic, &bytes).await {
                Ok(()) => {
                    self.breaker.record_success();
                    self.metrics.incr_replayed();
                    fallback::secure_delete(file, &path)?;
                    delivered += 1;
                }
                Err(_) => {
                    if self.breaker.record_failure(self.clock.now_epoch_ms()) {
                        self.metrics.incr_breaker_opens();
                    }
                    break;
                }
            }
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::broker::test_support::{FlakyBroker, PermanentlyBrokenBroker, RecordingBroker};
    use crate::clock::FakeClock;

    fn transport(broker: Arc<dyn BrokerClient>, dir: &std::path::Path, clock: Arc<dyn ClockSource>) -> Transport {
        let fallback = Arc::new(FallbackStore::new(dir.to_path_buf(), clock.clone()).unwrap());
        Transport::new(broker, fallback, "secure-logs".into(), 3, 3, 30_000, 20_000, Arc::new(Metrics::default()), clock)
    }

    #[tokio::test]
    async fn successful_send_goes_to_the_broker_not_fallback() {
        let dir = tempdir().unwrap();
        let broker = Arc::new(RecordingBroker::default());
        let t = transport(broker.clone(), dir.path(), Arc::new(FakeClock::new(0)));

        t.send(b"payload").await.unwrap();

        assert_eq!(broker.deliveries.lock().len(), 1);
        assert!(t.fallback.is_empty().unwrap());
    }

    #[tokio::test]
    async fn three_consecutive_failures_open_the_breaker_rest_go_straight_to_fallback() {
        let dir = tempdir().unwrap();
        let broker = Arc::new(PermanentlyBrokenBroker);
        let t = transport(broker, dir.path(), Arc::new(FakeClock::new(0)));

        for _ in 0..10 {
            t.send(b"payload").await.unwrap();
        }

        // All 10 end up in fallback: the first 3 after their own retries
        // exhaust (permanent errors aren't retried, so 1 attempt each before
        // tripping), the rest rejected outright once the breaker is open.
        let files = t.fallback.list_sorted().unwrap();
        assert_eq!(files.len(), 10);
    }

    #[tokio::test]
    async fn breaker_recovers_through_half_open_after_backoff() {
        let dir = tempdir().unwrap();
        let broker = Arc::new(FlakyBroker::new());
        let clock = Arc::new(FakeClock::new(0));
        let t = transport(broker.clone(), dir.path(), clock.clone());

        for _ in 0..3 {
            t.send(b"payload").await.unwrap();
        }
        assert!(!t.fallback.is_empty().unwrap());

        broker.healthy.store(true, std::sync::atomic::Ordering::SeqCst);
        clock.advance_ms(30_001);

        t.send(b"recovered").await.unwrap();
        assert_eq!(broker.inner.deliveries.lock().len(), 1);
    }

    #[tokio::test]
    async fn rate_limiter_routes_excess_sends_to_fallback() {
        let dir = tempdir().unwrap();
        let broker = Arc::new(RecordingBroker::default());
        let clock = Arc::new(FakeClock::new(0));
        let fallback = Arc::new(FallbackStore::new(dir.path().to_path_buf(), clock.clone()).unwrap());
        let t = Transport::new(broker.clone(), fallback, "secure-logs".into(), 3, 3, 30_000, 1, Arc::new(Metrics::default()), clock);

        t.send(b"first").await.unwrap();
        t.send(b"second").await.unwrap();

        assert_eq!(broker.deliveries.lock().len(), 1);
        assert_eq!(t.fallback.list_sorted().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replay_delivers_files_in_lexicographic_order_and_empties_directory() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(FakeClock::new(1_700_000_000_000));
        let fallback = Arc::new(FallbackStore::new(dir.path().to_path_buf(), clock.clone()).unwrap());
        let p1 = fallback.write(&crate::serializer::serialize_default(&crate::record::LogRecord::new(1, crate::record::Level::Info, "a"), 3).unwrap()).unwrap();
        clock.advance_ms(5);
        let p2 = fallback.write(&crate::serializer::serialize_default(&crate::record::LogRecord::new(2, crate::record::Level::Info, "b"), 3).unwrap()).unwrap();

        let broker = Arc::new(RecordingBroker::default());
        let t = Transport::new(broker.clone(), fallback.clone(), "secure-logs".into(), 3, 3, 30_000, 20_000, Arc::new(Metrics::default()), clock);

        let delivered = t.replay_once().await.unwrap();
        assert_eq!(delivered, 2);
        assert!(fallback.is_empty().unwrap());
        assert!(!p1.exists());
        assert!(!p2.exists());

        let deliveries = broker.deliveries.lock();
        assert_eq!(deliveries.len(), 2);
    }

    #[tokio::test]
    async fn replay_deletes_corrupt_files_without_delivering_them() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(FakeClock::new(0));
        let fallback = Arc::new(FallbackStore::new(dir.path().to_path_buf(), clock.clone()).unwrap());
        let corrupt = fallback.write(b"not zstd").unwrap();

        let broker = Arc::new(RecordingBroker::default());
        let t = Transport::new(broker.clone(), fallback.clone(), "secure-logs".into(), 3, 3, 30_000, 20_000, Arc::new(Metrics::default()), clock);

        let delivered = t.replay_once().await.unwrap();
        assert_eq!(delivered, 0);
        assert!(!corrupt.exists());
        assert!(broker.deliveries.lock().is_empty());
    }
}
