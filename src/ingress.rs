//! Ingress appender (C1, §4.1): a bounded queue in front of a cooperative
//! consumer pool.
//!
//! Grounded on the teacher's `worker/mod.rs` reader-thread / bounded-channel
//! pipeline (`flume::bounded(concurrency * 2)`, one task per stage, explicit
//! join-and-check-on-shutdown), generalized here from "read file chunks into
//! a channel" to "queue submitted records for a pool of consumers that each
//! drive them through the orchestrator".
//!
//! Chain ordering (§9 open question (b)): with more than one consumer thread,
//! two records can reach C5 out of submission order. `consumer_threads = 1`
//! gives strict ordering; the default of 2 trades that off for throughput.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::config::{CONSUMER_BATCH_DRAIN, CONSUMER_POLL_MS, DROP_WARNING_INTERVAL, SHUTDOWN_LATCH_TIMEOUT_MS};
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use crate::record::LogRecord;

/// Owns the bounded queue and the consumer task pool that drains it.
pub struct Ingress {
    tx: flume::Sender<LogRecord>,
    drain_rx: flume::Receiver<LogRecord>,
    running: Arc<AtomicBool>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    orchestrator: Arc<Orchestrator>,
    metrics: Arc<Metrics>,
    drop_count: Arc<AtomicU64>,
}

impl Ingress {
    /// Spawns `consumer_threads` cooperative consumers over a queue of
    /// `buffer_size` records.
    pub fn start(buffer_size: usize, consumer_threads: usize, orchestrator: Arc<Orchestrator>, metrics: Arc<Metrics>) -> Self {
        let (tx, rx) = flume::bounded(buffer_size.max(1));
        let running = Arc::new(AtomicBool::new(true));
        let mut handles = Vec::with_capacity(consumer_threads.max(1));

        for _ in 0..consumer_threads.max(1) {
            let rx = rx.clone();
            let orchestrator = orchestrator.clone();
            let running = running.clone();
            handles.push(tokio::spawn(Self::run_consumer(rx, orchestrator, running)));
        }

        Self { tx, drain_rx: rx, running, handles, orchestrator, metrics, drop_count: Arc::new(AtomicU64::new(0)) }
    }

    /// One consumer: block up to [`CONSUMER_POLL_MS`] for a first record,
    /// drain up to [`CONSUMER_BATCH_DRAIN`] more without blocking, process
    /// the batch in submission order, then drain any pending repeat-summaries.
    /// Loops while `running` or the queue still holds work.
    async fn run_consumer(rx: flume::Receiver<LogRecord>, orchestrator: Arc<Orchestrator>, running: Arc<AtomicBool>) {
        loop {
            let mut batch = Vec::new();
            match tokio::time::timeout(Duration::from_millis(CONSUMER_POLL_MS), rx.recv_async()).await {
                Ok(Ok(rec)) => batch.push(rec),
                Ok(Err(_disconnected)) => {
                    if !running.load(Ordering::SeqCst) && rx.is_empty() {
                        return;
                    }
                }
                Err(_timed_out) => {}
            }
            for _ in 0..CONSUMER_BATCH_DRAIN {
                match rx.try_recv() {
                    Ok(rec) => batch.push(rec),
                    Err(_) => break,
                }
            }

            for rec in batch {
                orchestrator.process(rec).await;
            }
            orchestrator.drain_summaries().await;

            if !running.load(Ordering::SeqCst) && rx.is_empty() {
                return;
            }
        }
    }

    /// Non-blocking submit (§4.1 step 1). On a full queue, the record is
    /// routed straight to the masked-fallback path instead of blocking the
    /// caller, with a rate-limited warning every [`DROP_WARNING_INTERVAL`] drops.
    pub fn submit(&self, rec: LogRecord) {
        match self.tx.try_send(rec) {
            Ok(()) => {}
            Err(flume::TrySendError::Full(rec)) | Err(flume::TrySendError::Disconnected(rec)) => {
                self.metrics.incr_dropped_buffer_full();
                let count = self.drop_count.fetch_add(1, Ordering::Relaxed) + 1;
                if count % DROP_WARNING_INTERVAL == 0 {
                    tracing::warn!(dropped = count, "ingress queue full, routing records to fallback");
                }
                let orchestrator = self.orchestrator.clone();
                tokio::spawn(async move { orchestrator.process_fallback(rec).await });
            }
        }
    }

    /// §4.1's shutdown sequence: stop admitting new work, wait for the
    /// consumer pool to drain the queue (bounded by
    /// [`SHUTDOWN_LATCH_TIMEOUT_MS`]), sweep anything still queued through
    /// the masked-fallback path, then flush C3's pending repeat-summaries.
    pub async fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        let handles = std::mem::take(&mut self.handles);
        let joined = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(Duration::from_millis(SHUTDOWN_LATCH_TIMEOUT_MS), joined).await.is_err() {
            tracing::warn!("ingress consumer shutdown latch timed out, draining remaining records directly");
        }

        while let Ok(rec) = self.drain_rx.try_recv() {
            self.orchestrator.process_fallback(rec).await;
        }

        self.orchestrator.close().await;
    }

    /// §6's `flush()`: waits for the queue to drain without stopping the
    /// consumer pool, then flushes any repeat-summaries pending at that
    /// instant. Unlike [`Self::shutdown`], submission keeps working afterwards.
    pub async fn flush(&self) {
        while !self.drain_rx.is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        self.orchestrator.drain_summaries().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::broker::test_support::RecordingBroker;
    use crate::clock::{ClockSource, FakeClock};
    use crate::config::PipelineConfig;
    use crate::fallback::FallbackStore;
    use crate::record::Level;
    use crate::transport::Transport;

    fn ingress(dir: &std::path::Path, buffer_size: usize, consumer_threads: usize) -> (Ingress, Arc<RecordingBroker>, Arc<Metrics>) {
        let clock: Arc<dyn ClockSource> = Arc::new(FakeClock::new(0));
        let broker = Arc::new(RecordingBroker::default());
        let fallback = Arc::new(FallbackStore::new(dir.to_path_buf(), clock.clone()).unwrap());
        let metrics = Arc::new(Metrics::default());
        let mut config = PipelineConfig::default();
        config.encryption_enabled = false;
        config.deduplication_enabled = false;
        let transport = Transport::new(broker.clone(), fallback, config.broker_topic.clone(), config.broker_retries, config.breaker_failure_threshold, config.breaker_open_duration_ms, config.rate_limit_rps, metrics.clone(), clock.clone());
        let orchestrator = Arc::new(Orchestrator::new(config, None, transport, metrics.clone(), clock));
        (Ingress::start(buffer_size, consumer_threads, orchestrator, metrics.clone()), broker, metrics)
    }

    #[tokio::test]
    async fn submitted_records_reach_the_broker() {
        let dir = tempdir().unwrap();
        let (mut ing, broker, _metrics) = ingress(dir.path(), 64, 2);

        for i in 0..20 {
            ing.submit(LogRecord::new(i, Level::Info, format!("event {i}")));
        }
        ing.shutdown().await;

        assert_eq!(broker.deliveries.lock().len(), 20);
    }

    #[tokio::test]
    async fn a_full_queue_routes_the_record_to_fallback_instead_of_blocking() {
        let dir = tempdir().unwrap();
        let (mut ing, _broker, metrics) = ingress(dir.path(), 1, 1);

        // consumer_threads = 1 but we never give the single consumer a chance
        // to run before hammering the queue, so the bounded channel (capacity
        // 1) fills and at least one submit falls back.
        for i in 0..50 {
            ing.submit(LogRecord::new(i, Level::Info, "burst"));
        }
        ing.shutdown().await;

        // Every record is accounted for: either delivered or dropped-to-fallback.
        let snap = metrics.snapshot();
        assert_eq!(snap.submitted + snap.dropped_buffer_full, 50);
    }

    #[tokio::test]
    async fn shutdown_drains_the_queue_before_returning() {
        let dir = tempdir().unwrap();
        let (mut ing, broker, _metrics) = ingress(dir.path(), 256, 2);

        for i in 0..5 {
            ing.submit(LogRecord::new(i, Level::Info, "draining"));
        }
        ing.shutdown().await;

        assert_eq!(broker.deliveries.lock().len(), 5);
    }
}
