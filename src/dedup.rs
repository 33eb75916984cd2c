//! Semantic deduplicator (C3): a bounded, time-windowed cache keyed by a
//! template extracted from the message plus the error signature.
//!
//! Grounded on the teacher's `worker/buffer.rs` bookkeeping-map style,
//! generalized from a fixed-size chunk buffer to a time-expiring cache; the
//! expiry/summary-emission behaviour has no direct teacher analogue and
//! follows the design's "ordered expiring map is sufficient" guidance
//! directly: a hashbrown map plus an insertion-ordered deque of write
//! timestamps.

use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::clock::ClockSource;
use crate::config::DEDUP_SUMMARY_CHANNEL_CAPACITY;
use crate::record::LogRecord;

/// Replaces every maximal run of decimal digits in `message` with `{}`.
/// No regex: a single allocation-free byte/char walk.
fn extract_template(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut chars = message.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            out.push('{');
            out.push('}');
            while matches!(chars.peek(), Some(d) if d.is_ascii_digit()) {
                chars.next();
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct Signature {
    template: String,
    error_sig: String,
}

impl Signature {
    fn from_record(rec: &LogRecord) -> Self {
        let template = extract_template(&rec.message);
        let error_sig: String = rec.error_signature.as_deref().unwrap_or("").chars().take(100).collect();
        Self { template, error_sig }
    }
}

struct Entry {
    counter: u64,
    first_record: LogRecord,
    last_write_epoch_ms: i64,
}

struct OrderEntry {
    sig: Signature,
    write_epoch_ms: i64,
}

struct State {
    entries: HashMap<Signature, Entry>,
    order: VecDeque<OrderEntry>,
}

/// Bounded, time-windowed duplicate detector with deferred repeat-summary
/// emission. `is_duplicate` is the only hot-path entry point; summaries are
/// handed off over a bounded channel rather than emitted under the lock.
pub struct Dedup {
    capacity: usize,
    window_ms: u64,
    clock: Arc<dyn ClockSource>,
    state: Mutex<State>,
    summary_tx: flume::Sender<LogRecord>,
}

impl Dedup {
    pub fn new(capacity: usize, window_ms: u64, clock: Arc<dyn ClockSource>) -> (Self, flume::Receiver<LogRecord>) {
        let (summary_tx, summary_rx) = flume::bounded(DEDUP_SUMMARY_CHANNEL_CAPACITY);
        let state = State { entries: HashMap::new(), order: VecDeque::new() };
        (Self { capacity, window_ms, clock, state: Mutex::new(state), summary_tx }, summary_rx)
    }

    /// Inserts or refreshes `rec`'s signature. Returns `true` if the
    /// signature was already present (i.e. `rec` is a duplicate).
    pub fn is_duplicate(&self, rec: &LogRecord) -> bool {
        let now = self.clock.now_epoch_ms();
        self.sweep_expired(now);

        let sig = Signature::from_record(rec);
        let mut state = self.state.lock();

        if let Some(entry) = state.entries.get_mut(&sig) {
            entry.counter += 1;
            entry.last_write_epoch_ms = now;
            state.order.push_back(OrderEntry { sig, write_epoch_ms: now });
            return true;
        }

        if state.entries.len() >= self.capacity {
            Self::evict_one(&mut state);
        }
        state.entries.insert(sig.clone(), Entry { counter: 1, first_record: rec.clone(), last_write_epoch_ms: now });
        state.order.push_back(OrderEntry { sig, write_epoch_ms: now });
        false
    }

    /// Flushes every live entry as if its window had just expired. Called
    /// from the ingress appender's shutdown sequence.
    pub fn close(&self) {
        let now = self.clock.now_epoch_ms();
        let entries = {
            let mut state = self.state.lock();
            state.order.clear();
            std::mem::take(&mut state.entries)
        };
        for (_, entry) in entries {
            self.emit_summary_if_repeated(entry, now);
        }
    }

    fn sweep_expired(&self, now: i64) {
        loop {
            let expired = {
                let mut state = self.state.lock();
                let Some(front) = state.order.front() else { break };
                if now.saturating_sub(front.write_epoch_ms) < self.window_ms as i64 {
                    break;
                }
                let order_entry = state.order.pop_front().expect("front already checked");
                match state.entries.get(&order_entry.sig) {
                    // Only remove if nothing refreshed the entry after this
                    // particular write was queued; otherwise a newer
                    // OrderEntry for the same signature is still pending.
                    Some(e) if e.last_write_epoch_ms == order_entry.write_epoch_ms => {
                        state.entries.remove(&order_entry.sig)
                    }
                    _ => None,
                }
            };
            match expired {
                Some(entry) => self.emit_summary_if_repeated(entry, now),
                None => continue,
            }
        }
    }

    fn emit_summary_if_repeated(&self, entry: Entry, now: i64) {
        if entry.counter > 1 {
            let summary = entry.first_record.clone().into_repeat_summary(now, entry.counter);
            // Best-effort: a full backlog means the consumer side is stuck;
            // dropping a summary is preferable to blocking the hot path.
            let _ = self.summary_tx.try_send(summary);
        }
    }

    /// Approximate eviction for the capacity bound: drops the
    /// earliest-queued still-live entry, emitting no summary (capacity
    /// eviction is explicitly not a window-expiry event).
    fn evict_one(state: &mut State) {
        while let Some(order_entry) = state.order.pop_front() {
            if state.entries.remove(&order_entry.sig).is_some() {
                return;
            }
        }
    }
}
