//! The `BrokerClient` external interface (§6): `send(topic, bytes) → future`.
//!
//! The real network-backed broker client (Kafka/pulsar/whatever wire
//! protocol the embedding application speaks) is explicitly out of scope
//! (§1) — the core only ever calls this trait. `async_trait` is used the
//! same way `GlobalSushrut-PARVYOM-metanode` uses it for its own service
//! trait boundaries, since dynamic dispatch over an `async fn` trait method
//! needs it.

use async_trait::async_trait;

use crate::error::TransportError;

#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn send(&self, topic: &str, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Accepts everything; useful as a default when no real broker is wired up.
pub struct NullBrokerClient;

#[async_trait]
impl BrokerClient for NullBrokerClient {
    async fn send(&self, _topic: &str, _bytes: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use parking_lot::Mutex;

    use super::{BrokerClient, async_trait};
    use crate::error::TransportError;

    /// Records every delivered `(topic, bytes)` pair; never fails.
    #[derive(Default)]
    pub struct RecordingBroker {
        pub deliveries: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl BrokerClient for RecordingBroker {
        async fn send(&self, topic: &str, bytes: &[u8]) -> Result<(), TransportError> {
            self.deliveries.lock().push((topic.to_string(), bytes.to_vec()));
            Ok(())
        }
    }

    /// Fails with a transient error until `healthy` is flipped true.
    pub struct FlakyBroker {
        pub healthy: AtomicBool,
        pub attempts: AtomicU64,
        pub inner: Arc<RecordingBroker>,
    }

    impl FlakyBroker {
        pub fn new() -> Self {
            Self { healthy: AtomicBool::new(false), attempts: AtomicU64::new(0), inner: Arc::new(RecordingBroker::default()) }
        }
    }

    #[async_trait]
    impl BrokerClient for FlakyBroker {
        async fn send(&self, topic: &str, bytes: &[u8]) -> Result<(), TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.healthy.load(Ordering::SeqCst) {
                self.inner.send(topic, bytes).await
            } else {
                Err(TransportError::Transient("broker unreachable".into()))
            }
        }
    }

    /// Always fails with a non-retryable error.
    pub struct PermanentlyBrokenBroker;

    #[async_trait]
    impl BrokerClient for PermanentlyBrokenBroker {
        async fn send(&self, _topic: &str, _bytes: &[u8]) -> Result<(), TransportError> {
            Err(TransportError::Permanent("invalid topic".into()))
        }
    }
}
