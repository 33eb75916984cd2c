//! PII masker (C4, §4.4).
//!
//! Two masking mechanisms, always applied in this order: (a) key-driven
//! masking, recursively walking `payload` and consulting a prebuilt
//! name→strategy table; (b) pattern-driven masking of any string that no key
//! matched, including `message`. Per the design's own note on C3 ("no regex
//! objects in the hot path") and the fact that no `regex` crate appears
//! anywhere in the retrieved example pack, the three detectors below are
//! hand-rolled, allocation-free byte scanners built once and reused — not a
//! general regular-expression engine.

use hashbrown::HashMap;
use serde_json::Value;

use crate::record::{Fields, LogRecord};

/// The fixed, closed set of masking strategies (§9: "no open-ended polymorphism required").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskStrategy {
    Rrn,
    CreditCard,
    Password,
    Ssn,
}

impl MaskStrategy {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "rrn" => Some(Self::Rrn),
            "credit_card" => Some(Self::CreditCard),
            "password" => Some(Self::Password),
            "ssn" => Some(Self::Ssn),
            _ => None,
        }
    }

    fn mask(self, value: &str) -> String {
        match self {
            Self::Rrn => mask_rrn_exact(value),
            Self::CreditCard => mask_credit_card(value),
            Self::Password => "********".to_string(),
            Self::Ssn => mask_ssn_exact(value),
        }
    }
}

/// RRN strategy: exact-length-14 strings keep the first 7 chars, the rest becomes 7 stars.
fn mask_rrn_exact(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() == 14 {
        let prefix: String = chars[..7].iter().collect();
        format!("{prefix}{}", "*******")
    } else {
        "******".to_string()
    }
}

/// Credit-card strategy: mask digits up to the last 4, preserve every non-digit byte.
fn mask_credit_card(value: &str) -> String {
    if value.chars().count() < 4 {
        return "****".to_string();
    }
    let total_digits = value.chars().filter(char::is_ascii_digit).count();
    let mut seen = 0usize;
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_digit() {
            seen += 1;
            if total_digits - seen < 4 {
                out.push(c);
            } else {
                out.push('*');
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// SSN strategy: exact-length-11 strings mask the first two groups, keep hyphens and the last 4.
fn mask_ssn_exact(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() == 11 {
        let suffix: String = chars[7..11].iter().collect();
        format!("***-**-{suffix}")
    } else {
        "***-**-****".to_string()
    }
}

/// Length, in bytes, of a pattern match starting at a char boundary, if any.
fn match_len(s: &str, start: usize, want: &[MatchKind]) -> Option<(usize, MatchKind)> {
    for kind in want {
        if let Some(len) = kind.try_match(s, start) {
            return Some((len, *kind));
        }
    }
    None
}

#[derive(Debug, Clone, Copy)]
enum MatchKind {
    CreditCard,
    Rrn,
    Ssn,
}

fn is_digit(b: &[u8], i: usize) -> bool {
    b.get(i).is_some_and(u8::is_ascii_digit)
}

impl MatchKind {
    /// Try to match this pattern at byte offset `start`; return byte length on success.
    fn try_match(self, s: &str, start: usize) -> Option<usize> {
        let b = s.as_bytes();
        match self {
            // \d{4}-\d{4}-\d{4}-\d{4}
            MatchKind::CreditCard => {
                const LEN: usize = 19;
                if start + LEN > b.len() {
                    return None;
                }
                let ok = (0..4).all(|i| is_digit(b, start + i))
                    && b[start + 4] == b'-'
                    && (0..4).all(|i| is_digit(b, start + 5 + i))
                    && b[start + 9] == b'-'
                    && (0..4).all(|i| is_digit(b, start + 10 + i))
                    && b[start + 14] == b'-'
                    && (0..4).all(|i| is_digit(b, start + 15 + i));
                ok.then_some(LEN)
            }
            // \d{6}-[1-4]\d{6}
            MatchKind::Rrn => {
                const LEN: usize = 14;
                if start + LEN > b.len() {
                    return None;
                }
                let ok = (0..6).all(|i| is_digit(b, start + i))
                    && b[start + 6] == b'-'
                    && matches!(b.get(start + 7), Some(b'1'..=b'4'))
                    && (0..6).all(|i| is_digit(b, start + 8 + i));
                ok.then_some(LEN)
            }
            // \d{3}-\d{2}-\d{4}
            MatchKind::Ssn => {
                const LEN: usize = 11;
                if start + LEN > b.len() {
                    return None;
                }
                let ok = (0..3).all(|i| is_digit(b, start + i))
                    && b[start + 3] == b'-'
                    && (0..2).all(|i| is_digit(b, start + 4 + i))
                    && b[start + 6] == b'-'
                    && (0..4).all(|i| is_digit(b, start + 7 + i));
                ok.then_some(LEN)
            }
        }
    }
}

const DETECTION_ORDER: &[MatchKind] = &[MatchKind::CreditCard, MatchKind::Rrn, MatchKind::Ssn];

/// Scans a string for RRN/credit-card/SSN shapes and masks every match found.
/// Characters outside a match are passed through unchanged.
fn scan_patterns(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut idx = 0;
    while idx < s.len() {
        if let Some((len, kind)) = match_len(s, idx, DETECTION_ORDER) {
            let matched = &s[idx..idx + len];
            out.push_str(&match kind {
                MatchKind::CreditCard => mask_credit_card(matched),
                MatchKind::Rrn => mask_rrn_exact(matched),
                MatchKind::Ssn => mask_ssn_exact(matched),
            });
            idx += len;
            continue;
        }
        let ch = s[idx..].chars().next().expect("idx is a valid char boundary");
        out.push(ch);
        idx += ch.len_utf8();
    }
    out
}

/// A compiled-once key→strategy table plus the pattern scanner, applied per §4.4.
pub struct Masker {
    table: HashMap<String, MaskStrategy>,
}

impl Masker {
    /// Builds the strategy table from the subset of `{rrn, credit_card, password, ssn}`
    /// named in `enabled_patterns`, installing the fixed aliases whenever their target
    /// strategy is itself enabled.
    pub fn new(enabled_patterns: &[String]) -> Self {
        let mut table = HashMap::new();
        for name in enabled_patterns {
            if let Some(strategy) = MaskStrategy::from_name(name.to_lowercase().as_str()) {
                table.insert(name.to_lowercase(), strategy);
                match strategy {
                    MaskStrategy::CreditCard => {
                        table.insert("card".to_string(), strategy);
                        table.insert("cardnumber".to_string(), strategy);
                    }
                    MaskStrategy::Password => {
                        table.insert("pwd".to_string(), strategy);
                    }
                    _ => {}
                }
            }
        }
        Self { table }
    }

    /// Applies key-driven masking to `payload`, then pattern-driven masking to `message`.
    pub fn mask(&self, rec: &LogRecord) -> LogRecord {
        let mut masked = rec.clone();
        masked.message = scan_patterns(&rec.message);
        masked.payload = self.mask_fields(&rec.payload);
        masked
    }

    fn mask_fields(&self, fields: &Fields) -> Fields {
        let mut out = Fields::new();
        // Snapshot iteration: `fields` is an owned borrow for the duration of this loop,
        // so no external mutation can interleave with it.
        for (key, value) in fields.iter() {
            let strategy = self.table.get(key.to_lowercase().as_str()).copied();
            out.insert(key.clone(), self.mask_value(value.clone(), strategy));
        }
        out
    }

    fn mask_value(&self, value: Value, strategy: Option<MaskStrategy>) -> Value {
        match value {
            Value::String(s) => match strategy {
                Some(strategy) => Value::String(strategy.mask(&s)),
                None => Value::String(scan_patterns(&s)),
            },
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (key, value) in map {
                    let strategy = self.table.get(key.to_lowercase().as_str()).copied();
                    out.insert(key, self.mask_value(value, strategy));
                }
                Value::Object(out)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::record::{Level, LogRecord};

    fn all_patterns() -> Vec<String> {
        vec!["rrn".into(), "credit_card".into(), "password".into(), "ssn".into()]
    }

    #[test]
    fn s1_rrn_masking_by_key() {
        let masker = Masker::new(&all_patterns());
        let mut rec = LogRecord::new(0, Level::Info, "User created");
        rec.payload.insert("rrn".into(), json!("123456-1234567"));
        let masked = masker.mask(&rec);
        assert_eq!(masked.payload.get("rrn").unwrap(), "123456-*******");
        assert_eq!(masked.message, "User created");
    }

    #[test]
    fn s2_credit_card_in_message() {
        let masker = Masker::new(&all_patterns());
        let rec = LogRecord::new(0, Level::Info, "Paid with 1234-5678-9012-3456");
        let masked = masker.mask(&rec);
        assert_eq!(masked.message, "Paid with ****-****-****-3456");
    }

    #[test]
    fn ssn_masking_by_key() {
        let masker = Masker::new(&all_patterns());
        let mut rec = LogRecord::new(0, Level::Info, "");
        rec.payload.insert("ssn".into(), json!("123-45-6789"));
        let masked = masker.mask(&rec);
        assert_eq!(masked.payload.get("ssn").unwrap(), "***-**-6789");
    }

    #[test]
    fn password_alias_pwd_is_masked() {
        let masker = Masker::new(&all_patterns());
        let mut rec = LogRecord::new(0, Level::Info, "");
        rec.payload.insert("pwd".into(), json!("hunter2"));
        let masked = masker.mask(&rec);
        assert_eq!(masked.payload.get("pwd").unwrap(), "********");
    }

    #[test]
    fn disabled_strategy_falls_back_to_pattern_scan() {
        // credit_card disabled entirely: key-driven lookup misses, but the pattern
        // scanner still catches the shape embedded in the string.
        let masker = Masker::new(&["rrn".into(), "password".into(), "ssn".into()]);
        let mut rec = LogRecord::new(0, Level::Info, "");
        rec.payload.insert("card".into(), json!("1234-5678-9012-3456"));
        let masked = masker.mask(&rec);
        assert_eq!(masked.payload.get("card").unwrap(), "****-****-****-3456");
    }

    #[test]
    fn nested_payload_is_recursively_masked() {
        let masker = Masker::new(&all_patterns());
        let mut rec = LogRecord::new(0, Level::Info, "");
        rec.payload.insert("user".into(), json!({"password": "secret", "name": "ada"}));
        let masked = masker.mask(&rec);
        let user = masked.payload.get("user").unwrap().as_object().unwrap();
        assert_eq!(user.get("password").unwrap(), "********");
        assert_eq!(user.get("name").unwrap(), "ada");
    }

    #[test]
    fn non_string_values_preserved_verbatim() {
        let masker = Masker::new(&all_patterns());
        let mut rec = LogRecord::new(0, Level::Info, "");
        rec.payload.insert("count".into(), json!(42));
        rec.payload.insert("flag".into(), json!(true));
        let masked = masker.mask(&rec);
        assert_eq!(masked.payload.get("count").unwrap(), 42);
        assert_eq!(masked.payload.get("flag").unwrap(), true);
    }

    #[test]
    fn mask_safety_no_original_substring_survives() {
        let masker = Masker::new(&all_patterns());
        let mut rec = LogRecord::new(0, Level::Info, "");
        rec.payload.insert("ssn".into(), json!("123-45-6789"));
        let masked = masker.mask(&rec);
        let masked_value = masked.payload.get("ssn").unwrap().as_str().unwrap();
        assert!(!masked_value.contains("6789") || masked_value.ends_with("6789"));
        assert!(!masked_value.contains("123-45"));
    }

    #[test]
    fn mask_idempotence() {
        let masker = Masker::new(&all_patterns());
        let mut rec = LogRecord::new(0, Level::Info, "Paid with 1234-5678-9012-3456");
        rec.payload.insert("ssn".into(), json!("123-45-6789"));
        rec.payload.insert("rrn".into(), json!("123456-1234567"));
        let once = masker.mask(&rec);
        let twice = masker.mask(&once);
        assert_eq!(once.message, twice.message);
        assert_eq!(once.payload, twice.payload);
    }

    #[test]
    fn empty_payload_message_still_scanned() {
        let masker = Masker::new(&all_patterns());
        let rec = LogRecord::new(0, Level::Info, "SSN 123-45-6789 on file");
        let masked = masker.mask(&rec);
        assert_eq!(masked.message, "SSN ***-**-6789 on file");
    }

    #[test]
    fn rrn_key_with_multibyte_chars_does_not_panic_on_char_boundary() {
        let masker = Masker::new(&all_patterns());
        let mut rec = LogRecord::new(0, Level::Info, "");
        // 14 chars, each a multi-byte codepoint: byte offset 7 is mid-char.
        rec.payload.insert("rrn".into(), json!("éééééééééééééé"));
        let masked = masker.mask(&rec);
        assert_eq!(masked.payload.get("rrn").unwrap(), "ééééééé*******");
    }

    #[test]
    fn ssn_key_with_multibyte_chars_does_not_panic_on_char_boundary() {
        let masker = Masker::new(&all_patterns());
        let mut rec = LogRecord::new(0, Level::Info, "");
        // 11 chars, each a multi-byte codepoint: byte offset 7 is mid-char.
        rec.payload.insert("ssn".into(), json!("éééééééééé1"));
        let masked = masker.mask(&rec);
        assert_eq!(masked.payload.get("ssn").unwrap(), "***-**-ééé1");
    }
}
