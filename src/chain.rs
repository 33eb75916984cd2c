//! Integrity chainer (C5, §4.5).
//!
//! Single-writer semantics over a mutex, not a spin lock — the pipeline runs
//! on blocking-allowed threads, grounded in the same choice the teacher's
//! `cipher/mac.rs` makes for its multi-part HMAC updates. The critical
//! section here is one SHA-256 computation, microseconds long, so a plain
//! `parking_lot::Mutex` is sufficient (§5).

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::CHAIN_GENESIS;
use crate::record::LogRecord;

/// The running chain cursor. `previous_hash` is lower-case hex, 64 characters.
pub struct ChainState {
    previous_hash: parking_lot::Mutex<String>,
}

impl Default for ChainState {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainState {
    pub fn new() -> Self {
        Self { previous_hash: parking_lot::Mutex::new(CHAIN_GENESIS.to_string()) }
    }

    /// Computes the next link and returns a record stamped with `integrity`.
    /// Advances the cursor under the lock so concurrent callers serialize here.
    pub fn add_to_chain(&self, rec: &LogRecord) -> LogRecord {
        let mut cursor = self.previous_hash.lock();
        let digest = Self::compute_digest(rec, &cursor);
        let hex_digest = hex::encode(digest);
        *cursor = hex_digest.clone();
        let mut out = rec.clone();
        out.integrity = Some(format!("sha256:{hex_digest}"));
        out
    }

    /// Recomputes the hash for `rec` against `expected_previous` and compares it,
    /// in constant time, to the hash stamped in `rec.integrity`.
    pub fn verify(rec: &LogRecord, expected_previous: &str) -> bool {
        let Some(integrity) = &rec.integrity else { return false };
        let Some(stripped) = integrity.strip_prefix("sha256:") else { return false };
        let Ok(stored) = hex::decode(stripped) else { return false };
        if stored.len() != 32 {
            return false;
        }
        let computed = Self::compute_digest(rec, expected_previous);
        computed.ct_eq(stored.as_slice()).into()
    }

    fn compute_digest(rec: &LogRecord, previous_hash: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(rec.timestamp.to_string().as_bytes());
        hasher.update(rec.level.as_str().as_bytes());
        hasher.update(rec.message.as_bytes());
        if !rec.payload.is_empty() {
            // `Fields` is a `BTreeMap`, and `serde_json::Map` defaults to a
            // `BTreeMap` backing store too (the `preserve_order` feature is
            // off), so `serde_json::to_string` already yields keys sorted
            // lexicographically at every depth — exactly the canonical form
            // the chain requires.
            let canonical = serde_json::to_string(&rec.payload).expect("Fields always serializes");
            hasher.update(canonical.as_bytes());
        }
        hasher.update(previous_hash.as_bytes());
        hasher.finalize().into()
    }

    /// Returns the current cursor as lower-case hex (for tests and diagnostics).
    pub fn current(&self) -> String {
        self.previous_hash.lock().clone()
    }

    /// Atomically writes the current cursor to `path` (write-temp, rename).
    pub fn save_state(&self, path: &Path) -> std::io::Result<()> {
        let cursor = self.previous_hash.lock().clone();
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, cursor.as_bytes())?;
        fs::rename(tmp, path)
    }

    /// Loads a persisted cursor. Returns `true` and updates the cursor only if the
    /// file's content is exactly 64 hex characters (optionally followed by
    /// trailing whitespace); otherwise leaves genesis untouched and returns `false`.
    pub fn try_load_state(&self, path: &Path) -> bool {
        let Ok(content) = fs::read_to_string(path) else { return false };
        let trimmed = content.trim_end();
        if trimmed.len() != 64 || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return false;
        }
        *self.previous_hash.lock() = trimmed.to_lowercase();
        true
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::record::{Level, LogRecord};

    #[test]
    fn genesis_is_64_zeros() {
        assert_eq!(ChainState::new().current(), CHAIN_GENESIS);
    }

    #[test]
    fn s4_chain_continuity_three_records() {
        let chain = ChainState::new();
        let r0 = LogRecord::new(1, Level::Info, "first");
        let r1 = LogRecord::new(2, Level::Info, "second");
        let r2 = LogRecord::new(3, Level::Info, "third");

        let out0 = chain.add_to_chain(&r0);
        assert!(ChainState::verify(&out0, CHAIN_GENESIS));

        let prev1 = out0.integrity.as_ref().unwrap().strip_prefix("sha256:").unwrap().to_string();
        let out1 = chain.add_to_chain(&r1);
        assert!(ChainState::verify(&out1, &prev1));

        let prev2 = out1.integrity.as_ref().unwrap().strip_prefix("sha256:").unwrap().to_string();
        let out2 = chain.add_to_chain(&r2);
        assert!(ChainState::verify(&out2, &prev2));

        // Verifying against the wrong previous hash must fail.
        assert!(!ChainState::verify(&out2, &prev1));
    }

    #[test]
    fn save_and_load_state_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chain.state");
        let chain = ChainState::new();
        let rec = LogRecord::new(1, Level::Info, "hello");
        chain.add_to_chain(&rec);
        chain.save_state(&path).unwrap();

        let restored = ChainState::new();
        assert!(restored.try_load_state(&path));
        assert_eq!(restored.current(), chain.current());
    }

    #[test]
    fn load_rejects_malformed_state_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chain.state");
        std::fs::write(&path, "not-hex-and-wrong-length").unwrap();
        let chain = ChainState::new();
        assert!(!chain.try_load_state(&path));
        assert_eq!(chain.current(), CHAIN_GENESIS);
    }

    #[test]
    fn tampered_message_fails_verification() {
        let chain = ChainState::new();
        let rec = LogRecord::new(1, Level::Info, "original");
        let out = chain.add_to_chain(&rec);
        let mut tampered = out.clone();
        tampered.message = "tampered".to_string();
        assert!(!ChainState::verify(&tampered, CHAIN_GENESIS));
    }

    #[test]
    fn digest_hashes_payload_before_previous_hash() {
        let mut rec = LogRecord::new(1, Level::Info, "hi");
        rec.payload.insert("k".into(), serde_json::json!("v"));
        let out = ChainState::new().add_to_chain(&rec);

        let canonical = serde_json::to_string(&rec.payload).unwrap();
        let mut expected = Sha256::new();
        expected.update(rec.timestamp.to_string().as_bytes());
        expected.update(rec.level.as_str().as_bytes());
        expected.update(rec.message.as_bytes());
        expected.update(canonical.as_bytes());
        expected.update(CHAIN_GENESIS.as_bytes());
        let expected_hex = hex::encode(expected.finalize());

        assert_eq!(out.integrity.unwrap(), format!("sha256:{expected_hex}"));
    }
}
