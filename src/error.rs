//! Error taxonomy for the secure log processing core.
//!
//! `TransportError` and `SerializeError` are the two variants the orchestrator
//! actually matches on: the former to decide retryability inside the circuit
//! breaker, the latter to recognize an oversized payload and bump the right
//! counter before falling back. Individual crypto/IO leaf calls propagate
//! with `anyhow` the way the teacher's `cipher/*` modules do; dropped-record
//! reasons (duplicate, rate-limited, buffer-full) are tracked as distinct
//! metrics counters rather than a shared enum, since nothing downstream ever
//! needs to match across them.

use thiserror::Error;

/// Errors raised while trying to deliver bytes to the broker.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transient broker error: {0}")]
    Transient(String),
    #[error("permanent broker error: {0}")]
    Permanent(String),
}

impl TransportError {
    /// Whether the circuit breaker should count this as a retryable failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

/// Errors from the canonical-JSON + Zstd serializer (C7).
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("serialized payload too large: {actual} bytes exceeds limit of {limit} bytes")]
    TooLarge { actual: u64, limit: u64 },
    #[error("zstd frame declares unknown or invalid content size")]
    ContentSize,
    #[error("serialized data is corrupt: {0}")]
    Corrupt(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable_permanent_is_not() {
        assert!(TransportError::Transient("timeout".into()).is_retryable());
        assert!(!TransportError::Permanent("bad topic".into()).is_retryable());
    }

    #[test]
    fn too_large_message_includes_both_numbers() {
        let err = SerializeError::TooLarge { actual: 200, limit: 100 };
        let msg = err.to_string();
        assert!(msg.contains("200"));
        assert!(msg.contains("100"));
    }
}
