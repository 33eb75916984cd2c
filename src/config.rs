//! Pipeline configuration and cryptographic/timing constants.
//!
//! This module defines the core constants and the typed configuration surface used
//! throughout the secure log processing core:
//! - Cryptographic parameters (key sizes, nonce sizes, KDF cost)
//! - Timing constants (rotation intervals, breaker backoff, rate limits)
//! - The `PipelineConfig` struct, deserializable from whatever the embedding
//!   application's config system loads (TOML, env, etc. — that loader is out of scope here)
//!
//! These constants are the single source of truth for wire/on-disk format details;
//! changing them changes the on-disk and wire layout.

use serde::{Deserialize, Serialize};

/// Size of a raw AES-256/DEK/KEK key in bytes.
pub const KEY_SIZE: usize = 32;

/// Output length of the Argon2id KDF wrapper reused from the teacher's
/// `cipher::Derive` (sized for its original dual-cipher key split); callers
/// needing a single 32-byte key take the first half.
pub const ARGON_KEY_LEN: usize = 64;

/// Size of the AES-GCM nonce in bytes (96 bits, NIST SP 800-38D).
pub const AES_NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes (128 bits).
pub const AES_TAG_SIZE: usize = 16;

/// Size of the SHA-256 hash chain link, in raw bytes.
pub const CHAIN_HASH_SIZE: usize = 32;

/// Length of the hex-encoded chain cursor, in ASCII characters.
pub const CHAIN_HASH_HEX_LEN: usize = CHAIN_HASH_SIZE * 2;

/// The genesis chain cursor: 64 ASCII zeros.
pub const CHAIN_GENESIS: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// DEK rotation interval: one hour, wall-clock.
pub const DEK_ROTATION_INTERVAL_MS: u64 = 60 * 60 * 1000;

/// KEK cache TTL: five minutes.
pub const KEK_CACHE_TTL_MS: u64 = 5 * 60 * 1000;

/// Zstd magic bytes, little-endian, present at the start of every frame.
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// File permission bits applied to the fallback KEK file: owner read+write only.
pub const KEK_FILE_MODE: u32 = 0o600;

/// Default dedup cache capacity.
pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;

/// Default dedup window, milliseconds.
pub const DEFAULT_DEDUP_WINDOW_MS: u64 = 1_000;

/// Bound on the single-producer single-consumer repeat-summary queue between
/// C3's expiry sweep and the orchestrator's summary re-entry point.
pub const DEDUP_SUMMARY_CHANNEL_CAPACITY: usize = 1_024;

/// Ingress consumer batch size: one blocking head-of-queue pop...
pub const CONSUMER_BATCH_FIRST: usize = 1;

/// ...plus up to this many additional non-blocking pops, for a max batch of 100.
pub const CONSUMER_BATCH_DRAIN: usize = 99;

/// Poll timeout for the first record in a consumer batch.
pub const CONSUMER_POLL_MS: u64 = 100;

/// Consumer shutdown latch timeout.
pub const SHUTDOWN_LATCH_TIMEOUT_MS: u64 = 10_000;

/// Emit a rate-limited drop warning every this many buffer-full drops.
pub const DROP_WARNING_INTERVAL: u64 = 1_000;

/// Upper bound on plaintext JSON size before compression.
pub const DEFAULT_MAX_SERIALIZED_BYTES: u64 = 100 * 1024 * 1024;

/// Fixed delay between retry attempts inside the breaker's CLOSED/HALF_OPEN states.
pub const RETRY_DELAY_MS: u64 = 100;

/// Consecutive HALF_OPEN successes required before the breaker closes again.
pub const BREAKER_SUCCESS_THRESHOLD: u32 = 2;

/// Ceiling on the breaker's doubling backoff, regardless of repeated reopens.
pub const BREAKER_MAX_OPEN_MS: u64 = 5 * 60 * 1000;

/// Operating mode of the pipeline's ingress path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PipelineMode {
    /// `submit` blocks the caller through the full pipeline (used mostly by tests).
    Sync,
    /// `submit` enqueues and returns; a consumer pool drives the pipeline.
    Async,
    /// Every record is written straight to the fallback store, bypassing the broker.
    Fallback,
}

/// The full configuration surface recognized by the core (§6 of the design).
///
/// Every field has a default matching the design's configuration-surface table;
/// the embedding application is expected to deserialize this from its own config
/// system (env, TOML, …) and hand the result to [`crate::SecureLogCore::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    pub buffer_size: usize,
    pub consumer_threads: usize,
    pub pii_masking_enabled: bool,
    pub pii_patterns: Vec<String>,
    pub encryption_enabled: bool,
    pub integrity_enabled: bool,
    pub deduplication_enabled: bool,
    pub deduplication_window_ms: u64,
    pub compression_level: i32,
    pub max_payload_bytes: u64,
    pub fallback_directory: String,
    pub broker_topic: String,
    pub broker_retries: u32,
    pub breaker_failure_threshold: u32,
    pub breaker_open_duration_ms: u64,
    pub rate_limit_rps: u32,
    pub auto_replay_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::Async,
            buffer_size: 8192,
            consumer_threads: 2,
            pii_masking_enabled: true,
            pii_patterns: vec!["rrn".into(), "credit_card".into(), "password".into(), "ssn".into()],
            encryption_enabled: true,
            integrity_enabled: true,
            deduplication_enabled: true,
            deduplication_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            compression_level: 3,
            max_payload_bytes: DEFAULT_MAX_SERIALIZED_BYTES,
            fallback_directory: "logs/fallback".into(),
            broker_topic: "secure-logs".into(),
            broker_retries: 3,
            breaker_failure_threshold: 3,
            breaker_open_duration_ms: 30_000,
            rate_limit_rps: 20_000,
            auto_replay_interval_ms: 60_000,
        }
    }
}

impl PipelineConfig {
    /// Validates the configuration, returning a human-readable error on the first
    /// violated constraint. Mirrors the "configuration error" cases called out in §4.7.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=22).contains(&self.compression_level) {
            return Err(format!("compression_level must be in 1..=22, got {}", self.compression_level));
        }
        if self.consumer_threads == 0 {
            return Err("consumer_threads must be >= 1".into());
        }
        if self.buffer_size == 0 {
            return Err("buffer_size must be >= 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_compression_level() {
        let mut cfg = PipelineConfig::default();
        cfg.compression_level = 23;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn genesis_is_64_zero_chars() {
        assert_eq!(CHAIN_GENESIS.len(), CHAIN_HASH_HEX_LEN);
        assert!(CHAIN_GENESIS.bytes().all(|b| b == b'0'));
    }
}
