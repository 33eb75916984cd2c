//! Pipeline orchestrator (C2, §4.2): stage-chains C3→C4→C5→C6→C7→C8 per
//! record, with configuration gating and masked-fallback failure routing.
//!
//! Grounded on the teacher's `worker/pipeline.rs` style of chaining stages
//! with early return on the first error (`match stage(...) { Ok(x) => x,
//! Err(e) => return Err(e) }`), generalized here to route failures to the
//! fallback store instead of aborting the whole operation — a single bad
//! record must never take down the pipeline.

use std::sync::Arc;

use anyhow::Result;

use crate::chain::ChainState;
use crate::config::{DEFAULT_DEDUP_CAPACITY, PipelineConfig};
use crate::dedup::Dedup;
use crate::envelope::Envelope;
use crate::error::SerializeError;
use crate::mask::Masker;
use crate::metrics::Metrics;
use crate::record::LogRecord;
use crate::serializer;
use crate::transport::Transport;

pub struct Orchestrator {
    config: PipelineConfig,
    masker: Masker,
    chain: ChainState,
    envelope: Option<Envelope>,
    dedup: Option<Dedup>,
    summary_rx: Option<flume::Receiver<LogRecord>>,
    transport: Transport,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, envelope: Option<Envelope>, transport: Transport, metrics: Arc<Metrics>, clock: Arc<dyn crate::clock::ClockSource>) -> Self {
        let masker = Masker::new(&config.pii_patterns);
        let (dedup, summary_rx) = if config.deduplication_enabled {
            let (d, rx) = Dedup::new(DEFAULT_DEDUP_CAPACITY, config.deduplication_window_ms, clock);
            (Some(d), Some(rx))
        } else {
            (None, None)
        };
        Self { config, masker, chain: ChainState::new(), envelope, dedup, summary_rx, transport, metrics }
    }

    /// The public submit path (§4.2 steps 1-9).
    pub async fn process(&self, rec: LogRecord) {
        self.metrics.incr_submitted();

        if let Some(dedup) = &self.dedup {
            if dedup.is_duplicate(&rec) {
                self.metrics.incr_dropped_duplicate();
                return;
            }
        }

        let masked = self.mask_if_enabled(rec);
        self.run_from_masked(masked).await;
    }

    /// Summary records produced by C3's deferred callback re-enter here,
    /// skipping dedup (§4.2, §9 open question (a)).
    pub async fn process_summary(&self, rec: LogRecord) {
        let masked = self.mask_if_enabled(rec);
        if self.run_from_masked_result(masked.clone()).await.is_ok() {
            self.metrics.incr_summaries_emitted();
        } else {
            self.serialize_and_store_fallback(masked).await;
        }
    }

    /// Applies masking and encryption (only) and writes directly to the
    /// fallback store, bypassing integrity/serialization-size/transport.
    /// Used by C1's shutdown drain for records that never got an orchestrator pass.
    pub async fn process_fallback(&self, rec: LogRecord) {
        let masked = self.mask_if_enabled(rec);
        let encrypted = match &self.envelope {
            Some(envelope) => envelope.encrypt(masked.clone()).unwrap_or(masked),
            None => masked,
        };
        self.serialize_and_store_fallback(encrypted).await;
    }

    /// Drains any repeat-summaries C3 has queued, feeding each back through
    /// [`Self::process_summary`]. Called periodically by ingress consumers
    /// and once more, to completion, during [`Self::close`].
    pub async fn drain_summaries(&self) {
        if let Some(rx) = &self.summary_rx {
            while let Ok(rec) = rx.try_recv() {
                self.process_summary(rec).await;
            }
        }
    }

    /// Flushes C3's pending entries as repeat-summaries, then drains them.
    pub async fn close(&self) {
        if let Some(dedup) = &self.dedup {
            dedup.close();
        }
        self.drain_summaries().await;
    }

    /// Forces the circuit breaker back to `CLOSED` immediately (admin call, §6).
    pub fn reset_circuit_breaker(&self) {
        self.transport.reset_circuit_breaker();
    }

    /// Runs one fallback-replay sweep now (admin call, §6).
    pub async fn replay_fallback_now(&self) -> Result<usize> {
        self.transport.replay_once().await
    }

    /// A point-in-time copy of every counter (§6/§8 property 8).
    pub fn metrics_snapshot(&self) -> crate::metrics::MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn mask_if_enabled(&self, rec: LogRecord) -> LogRecord {
        if self.config.pii_masking_enabled { self.masker.mask(&rec) } else { rec }
    }

    async fn run_from_masked(&self, masked: LogRecord) {
        if self.run_from_masked_result(masked.clone()).await.is_err() {
            self.serialize_and_store_fallback(masked).await;
        }
    }

    async fn run_from_masked_result(&self, masked: LogRecord) -> Result<()> {
        match self.run_remaining_stages(masked).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "pipeline stage failed, routing record to fallback");
                self.metrics.incr_pipeline_errors();
                Err(e)
            }
        }
    }

    async fn run_remaining_stages(&self, mut rec: LogRecord) -> Result<()> {
        if self.config.integrity_enabled {
            rec = self.chain.add_to_chain(&rec);
        }
        if let Some(envelope) = &self.envelope {
            rec = envelope.encrypt(rec)?;
        }
        let bytes = self.serialize_for_transport(&rec)?;
        self.transport.send(&bytes).await?;
        Ok(())
    }

    fn serialize_for_transport(&self, rec: &LogRecord) -> Result<Vec<u8>, SerializeError> {
        let result = serializer::serialize(rec, self.config.compression_level, self.config.max_payload_bytes);
        if let Err(SerializeError::TooLarge { .. }) = &result {
            self.metrics.incr_serialize_too_large();
        }
        result
    }

    /// Serializes `rec` with no size bound (the fallback directory isn't
    /// subject to the broker's wire-size contract, only the live send path
    /// is — §9 open question resolution: see DESIGN.md) and writes it
    /// straight to disk, bypassing breaker/retry/rate-limit entirely.
    async fn serialize_and_store_fallback(&self, rec: LogRecord) {
        match serializer::serialize(&rec, self.config.compression_level, u64::MAX) {
            Ok(bytes) => {
                if let Err(e) = self.transport.send_to_fallback(&bytes) {
                    tracing::error!(error = %e, "failed to write fallback file");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize record for fallback storage"),
        }
    }
}
