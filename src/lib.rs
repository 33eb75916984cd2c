//! Secure log processing core: an in-process pipeline that deduplicates,
//! masks PII from, hash-chains, envelope-encrypts, and resiliently forwards
//! structured log records.
//!
//! The wire-level broker client, the KMS client, configuration loading, and
//! the logging façade are all external interfaces (see [`broker::BrokerClient`]
//! and [`keys::KeyManager`]) — this crate only ever calls them, it never
//! implements them for production use. Wire up a real implementation of each
//! and hand [`SecureLogCore::new`] a [`config::PipelineConfig`] to get a
//! running pipeline.

pub mod broker;
pub mod chain;
pub mod cipher;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod envelope;
pub mod error;
pub mod fallback;
pub mod ingress;
pub mod keys;
pub mod mask;
pub mod metrics;
pub mod orchestrator;
pub mod record;
pub mod secret;
pub mod serializer;
pub mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use broker::BrokerClient;
use clock::{ClockSource, SystemClock};
use config::{PipelineConfig, PipelineMode};
use envelope::Envelope;
use fallback::FallbackStore;
use ingress::Ingress;
use keys::KeyManager;
use metrics::{Metrics, MetricsSnapshot};
use orchestrator::Orchestrator;
use transport::Transport;

/// Installs a `tracing_subscriber::fmt` subscriber as the global default, the
/// same formatter the teacher's `App::init` wired up. The core itself never
/// calls this — subscriber installation belongs to the embedding application
/// (§6) — but binaries, tests, and examples that just want the admin-visible
/// log sites (§7: breaker transitions, fallback-key warning, replay sweeps,
/// drop-counter milestones, DEK rotation) on stderr can call it once at startup.
pub fn install_default_subscriber() -> Result<()> {
    let subscriber = tracing_subscriber::fmt().with_file(true).with_line_number(true).finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|e| anyhow::anyhow!(e))
}

/// The assembled pipeline: C1 through C8 wired together from a
/// [`PipelineConfig`], a caller-supplied [`BrokerClient`], and an optional
/// [`KeyManager`] (falls back to [`keys::FallbackKeyManager`] rooted at
/// `fallback_directory` when `None`, per §4.6's dev-mode note).
pub struct SecureLogCore {
    mode: PipelineMode,
    ingress: AsyncMutex<Option<Ingress>>,
    orchestrator: Arc<Orchestrator>,
    auto_replay: AsyncMutex<Option<JoinHandle<()>>>,
}

impl SecureLogCore {
    /// Builds the pipeline and starts its consumer pool. `key_manager: None`
    /// uses [`keys::FallbackKeyManager`] rooted under `config.fallback_directory`.
    pub fn new(config: PipelineConfig, broker: Arc<dyn BrokerClient>, key_manager: Option<Arc<dyn KeyManager>>) -> Result<Self> {
        let clock: Arc<dyn ClockSource> = Arc::new(SystemClock);
        Self::with_clock(config, broker, key_manager, clock)
    }

    /// Same as [`Self::new`] but with an injected clock, for deterministic tests.
    pub fn with_clock(config: PipelineConfig, broker: Arc<dyn BrokerClient>, key_manager: Option<Arc<dyn KeyManager>>, clock: Arc<dyn ClockSource>) -> Result<Self> {
        config.validate().map_err(|e| anyhow::anyhow!(e))?;

        let metrics = Arc::new(Metrics::default());
        let fallback_dir = PathBuf::from(&config.fallback_directory);
        let fallback = Arc::new(FallbackStore::new(fallback_dir.clone(), clock.clone())?);

        let transport = Transport::new(
            broker,
            fallback,
            config.broker_topic.clone(),
            config.broker_retries,
            config.breaker_failure_threshold,
            config.breaker_open_duration_ms,
            config.rate_limit_rps,
            metrics.clone(),
            clock.clone(),
        );

        let envelope = if config.encryption_enabled {
            let key_manager = key_manager.unwrap_or_else(|| {
                Arc::new(keys::FallbackKeyManager::new(fallback_dir.join("kek.bin"), fallback_dir.join("seed.bin"), clock.clone())) as Arc<dyn KeyManager>
            });
            Some(Envelope::new(key_manager, clock.clone())?)
        } else {
            None
        };

        let mode = config.mode;
        let orchestrator = Arc::new(Orchestrator::new(config.clone(), envelope, transport, metrics.clone(), clock));
        let ingress = Ingress::start(config.buffer_size, config.consumer_threads, orchestrator.clone(), metrics);

        Ok(Self { mode, ingress: AsyncMutex::new(Some(ingress)), orchestrator, auto_replay: AsyncMutex::new(None) })
    }

    /// Submits a record per the configured [`PipelineMode`] (§6 `submit(record)`):
    /// `Async` (default) enqueues onto C1's buffer and returns immediately;
    /// `Sync` drives the record through the whole pipeline before returning,
    /// bypassing the queue entirely; `Fallback` always writes straight to the
    /// fallback store, bypassing the broker.
    pub async fn submit(&self, rec: record::LogRecord) {
        match self.mode {
            PipelineMode::Async => {
                if let Some(ingress) = self.ingress.lock().await.as_ref() {
                    ingress.submit(rec);
                }
            }
            PipelineMode::Sync => self.orchestrator.process(rec).await,
            PipelineMode::Fallback => self.orchestrator.process_fallback(rec).await,
        }
    }

    /// §6's `flush()`: waits for currently queued records to drain without
    /// stopping ingestion.
    pub async fn flush(&self) {
        if let Some(ingress) = self.ingress.lock().await.as_ref() {
            ingress.flush().await;
        }
    }

    /// A point-in-time copy of every counter (§6/§8 property 8).
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.orchestrator.metrics_snapshot()
    }

    /// Forces the circuit breaker back to `CLOSED` immediately.
    pub fn reset_circuit_breaker(&self) {
        self.orchestrator.reset_circuit_breaker();
    }

    /// Runs one fallback-replay sweep now, outside of the auto-replay schedule.
    pub async fn replay_fallback_now(&self) -> Result<usize> {
        self.orchestrator.replay_fallback_now().await
    }

    /// Starts a background task that calls [`Self::replay_fallback_now`] every
    /// `interval_ms` milliseconds (§4.8's scheduled replay). Replaces any
    /// previously running schedule.
    pub async fn enable_auto_replay(self: &Arc<Self>, interval_ms: u64) {
        self.disable_auto_replay().await;
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(1)));
            loop {
                ticker.tick().await;
                if let Err(e) = this.replay_fallback_now().await {
                    tracing::error!(error = %e, "fallback replay sweep failed");
                }
            }
        });
        *self.auto_replay.lock().await = Some(handle);
    }

    pub async fn disable_auto_replay(&self) {
        if let Some(handle) = self.auto_replay.lock().await.take() {
            handle.abort();
        }
    }

    /// §6's `close()`: stops accepting new records, drains the ingress queue,
    /// flushes C3's pending repeat-summaries, and stops auto-replay.
    pub async fn close(&self) {
        self.disable_auto_replay().await;
        if let Some(mut ingress) = self.ingress.lock().await.take() {
            ingress.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::broker::test_support::RecordingBroker;
    use crate::record::{Level, LogRecord};

    #[tokio::test]
    async fn end_to_end_submit_reaches_the_broker() {
        let dir = tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.fallback_directory = dir.path().to_string_lossy().into_owned();
        config.encryption_enabled = false;
        config.deduplication_enabled = false;

        let broker = Arc::new(RecordingBroker::default());
        let core = SecureLogCore::with_clock(config, broker.clone(), None, Arc::new(clock::FakeClock::new(0))).unwrap();

        core.submit(LogRecord::new(1, Level::Info, "hello")).await;
        core.close().await;

        assert_eq!(broker.deliveries.lock().len(), 1);
        assert_eq!(core.metrics_snapshot().sent, 1);
    }
}
