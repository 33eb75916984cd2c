//! The log record data model (§3).
//!
//! `LogRecord` is the unit of work threaded through every stage. Each stage
//! consumes a record and produces a new one (or a reference to the same one);
//! mutation is by replacement, never in place, so that an upstream stage's
//! edits are never observable before the downstream stage has actually run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity level of a [`LogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// An ordered string-keyed map used for both `context` and `payload`.
///
/// `BTreeMap` rather than `hashbrown::HashMap` here: §4.5 requires the
/// payload's canonical-JSON serialization to sort keys lexicographically at
/// every depth for the integrity chain, and a `BTreeMap` gives that ordering
/// for free instead of re-sorting snapshotted entries on every hash.
pub type Fields = BTreeMap<String, Value>;

/// The unit of work threaded through the pipeline (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: i64,
    pub level: Level,
    #[serde(default)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub span_id: Option<String>,
    #[serde(default)]
    pub context: Fields,
    #[serde(default)]
    pub payload: Fields,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub integrity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub encrypted_dek: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub repeat_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_signature: Option<String>,
}

impl Level {
    /// Wire representation, matching the `serde(rename_all = "UPPERCASE")` form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl LogRecord {
    /// Builds a minimal record; everything optional is left unset.
    pub fn new(timestamp: i64, level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            level,
            message: message.into(),
            trace_id: None,
            span_id: None,
            context: Fields::new(),
            payload: Fields::new(),
            integrity: None,
            encrypted_dek: None,
            repeat_count: None,
            error_signature: None,
        }
    }

    /// True once C6 has replaced `payload` with `{ "encrypted": ... }` (invariant 1, §3).
    pub fn is_encrypted(&self) -> bool {
        self.encrypted_dek.is_some() && self.payload.len() == 1 && self.payload.contains_key("encrypted")
    }

    /// Builds the synthetic repeat-summary record described in §4.3.
    pub fn into_repeat_summary(mut self, now_epoch_ms: i64, counter: u64) -> Self {
        self.message.push_str(" [repeated]");
        self.timestamp = now_epoch_ms;
        self.repeat_count = Some(counter);
        self.integrity = None;
        self.encrypted_dek = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_has_no_optional_fields_set() {
        let rec = LogRecord::new(0, Level::Info, "hello");
        assert!(rec.integrity.is_none());
        assert!(rec.encrypted_dek.is_none());
        assert!(!rec.is_encrypted());
    }

    #[test]
    fn repeat_summary_suffixes_message_and_sets_count() {
        let rec = LogRecord::new(100, Level::Info, "User created");
        let summary = rec.into_repeat_summary(200, 5);
        assert_eq!(summary.message, "User created [repeated]");
        assert_eq!(summary.repeat_count, Some(5));
        assert_eq!(summary.timestamp, 200);
    }

    #[test]
    fn serde_roundtrip_preserves_fields() {
        let mut rec = LogRecord::new(42, Level::Warn, "disk low");
        rec.payload.insert("disk".into(), Value::String("/dev/sda1".into()));
        let json = serde_json::to_string(&rec).unwrap();
        let back: LogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message, "disk low");
        assert_eq!(back.payload.get("disk").unwrap(), "/dev/sda1");
    }
}
