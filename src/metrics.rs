//! Metrics for the core (§6, §7, §8 property 8, scenario S5).
//!
//! Not a metrics *library* — the spec's Non-goals don't ask for one — just
//! plain atomics behind a snapshot accessor, enough to observe the property
//! laws in tests and to give operators the admin-visible counters §7 promises.
//! Crucially `sent` and `fallback_written` are tracked separately (§9, open
//! question (c)) and never merged.

use std::sync::atomic::{AtomicU64, Ordering};

/// A point-in-time copy of [`Metrics`]' counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub sent: u64,
    pub fallback_written: u64,
    pub replayed: u64,
    pub dropped_duplicate: u64,
    pub dropped_rate_limited: u64,
    pub dropped_buffer_full: u64,
    pub pipeline_errors: u64,
    pub serialize_too_large: u64,
    pub breaker_opens: u64,
    pub summaries_emitted: u64,
}

/// Process-wide counters, one field per [`MetricsSnapshot`] entry.
#[derive(Debug, Default)]
pub struct Metrics {
    submitted: AtomicU64,
    sent: AtomicU64,
    fallback_written: AtomicU64,
    replayed: AtomicU64,
    dropped_duplicate: AtomicU64,
    dropped_rate_limited: AtomicU64,
    dropped_buffer_full: AtomicU64,
    pipeline_errors: AtomicU64,
    serialize_too_large: AtomicU64,
    breaker_opens: AtomicU64,
    summaries_emitted: AtomicU64,
}

macro_rules! counter_methods {
    ($($field:ident => $inc:ident),+ $(,)?) => {
        $(
            pub fn $inc(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )+
    };
}

impl Metrics {
    counter_methods! {
        submitted => incr_submitted,
        sent => incr_sent,
        fallback_written => incr_fallback_written,
        replayed => incr_replayed,
        dropped_duplicate => incr_dropped_duplicate,
        dropped_rate_limited => incr_dropped_rate_limited,
        dropped_buffer_full => incr_dropped_buffer_full,
        pipeline_errors => incr_pipeline_errors,
        serialize_too_large => incr_serialize_too_large,
        breaker_opens => incr_breaker_opens,
        summaries_emitted => incr_summaries_emitted,
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            fallback_written: self.fallback_written.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            dropped_duplicate: self.dropped_duplicate.load(Ordering::Relaxed),
            dropped_rate_limited: self.dropped_rate_limited.load(Ordering::Relaxed),
            dropped_buffer_full: self.dropped_buffer_full.load(Ordering::Relaxed),
            pipeline_errors: self.pipeline_errors.load(Ordering::Relaxed),
            serialize_too_large: self.serialize_too_large.load(Ordering::Relaxed),
            breaker_opens: self.breaker_opens.load(Ordering::Relaxed),
            summaries_emitted: self.summaries_emitted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sent_and_fallback_written_are_independent() {
        let m = Metrics::default();
        m.incr_sent();
        m.incr_sent();
        m.incr_fallback_written();
        let snap = m.snapshot();
        assert_eq!(snap.sent, 2);
        assert_eq!(snap.fallback_written, 1);
    }
}
