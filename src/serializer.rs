//! Canonical JSON + Zstd serializer (C7, §4.7).
//!
//! Grounded directly on the teacher's declared `zstd` dependency — the
//! teacher's own `compression.rs` wraps `flate2`'s zlib instead and has no
//! remaining use once this module exists (trimmed in the final pass). Size
//! bounds and the frame-header content-size check are new: the file-container
//! format the teacher built had no equivalent pre-compression size ceiling.

use crate::config::{DEFAULT_MAX_SERIALIZED_BYTES, ZSTD_MAGIC};
use crate::error::SerializeError;
use crate::record::LogRecord;

/// Serializes `rec` to canonical JSON, enforcing `max_bytes` on the
/// pre-compression size, then compresses with Zstd at `level`.
pub fn serialize(rec: &LogRecord, level: i32, max_bytes: u64) -> Result<Vec<u8>, SerializeError> {
    let json = serde_json::to_vec(rec)?;
    if json.len() as u64 > max_bytes {
        return Err(SerializeError::TooLarge { actual: json.len() as u64, limit: max_bytes });
    }
    zstd::encode_all(json.as_slice(), level).map_err(|e| SerializeError::Corrupt(format!("zstd compression failed: {e}")))
}

/// Inverts [`serialize`]: validates the Zstd frame's declared content size
/// against `max_bytes` before allocating, decompresses, and parses JSON.
pub fn deserialize(bytes: &[u8], max_bytes: u64) -> Result<LogRecord, SerializeError> {
    let declared = frame_content_size(bytes).ok_or(SerializeError::ContentSize)?;
    if declared > max_bytes {
        return Err(SerializeError::TooLarge { actual: declared, limit: max_bytes });
    }

    let decoded =
        zstd::decode_all(bytes).map_err(|e| SerializeError::Corrupt(format!("zstd decompression failed: {e}")))?;
    if decoded.len() as u64 != declared {
        return Err(SerializeError::Corrupt(format!(
            "decompressed {} bytes, frame header declared {}",
            decoded.len(),
            declared
        )));
    }

    Ok(serde_json::from_slice(&decoded)?)
}

/// Reads the declared decompressed size straight out of the Zstd frame
/// header (RFC 8478 §3.1.1), without invoking the decoder. Returns `None`
/// when the size is absent/unknown (`Frame_Content_Size_Flag == 0` and
/// `Single_Segment_Flag` unset) or the header is truncated/malformed.
fn frame_content_size(bytes: &[u8]) -> Option<u64> {
    if bytes.len() < 5 || bytes[0..4] != ZSTD_MAGIC {
        return None;
    }
    let descriptor = bytes[4];
    let fcs_flag = descriptor >> 6;
    let single_segment = descriptor & 0b0010_0000 != 0;
    let dict_id_flag = descriptor & 0b0000_0011;

    let mut pos = 5usize;
    if !single_segment {
        pos += 1; // Window_Descriptor
    }
    pos += match dict_id_flag {
        0 => 0,
        1 => 1,
        2 => 2,
        _ => 4,
    };

    let fcs_len: usize = match (fcs_flag, single_segment) {
        (0, false) => return None,
        (0, true) => 1,
        (1, _) => 2,
        (2, _) => 4,
        _ => 8,
    };

    let field = bytes.get(pos..pos + fcs_len)?;
    let mut buf = [0u8; 8];
    buf[..fcs_len].copy_from_slice(field);
    let mut value = u64::from_le_bytes(buf);
    if fcs_len == 2 {
        value += 256;
    }
    Some(value)
}

/// Serializes with the library default size bound (100 MiB).
pub fn serialize_default(rec: &LogRecord, level: i32) -> Result<Vec<u8>, SerializeError> {
    serialize(rec, level, DEFAULT_MAX_SERIALIZED_BYTES)
}
