//! Envelope encryptor (C6): AES-256-GCM payload encryption under a rotated
//! DEK, itself wrapped under a KEK obtained from a [`KeyManager`].
//!
//! Grounded on the teacher's `cipher/aes_gcm.rs` wire format (`IV ∥
//! ciphertext ∥ tag`, nonce prepended by `AesGcm::encrypt`) — reused directly
//! rather than reimplemented. The DEK/KEK hierarchy and rotation are new:
//! the teacher's tool encrypted whole files with a single password-derived
//! key and had no key rotation concept.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use rand::rand_core::{OsRng, TryRngCore};
use secrecy::ExposeSecret;
use secrecy::zeroize::Zeroize;

use crate::cipher::AesGcm;
use crate::clock::ClockSource;
use crate::config::{DEK_ROTATION_INTERVAL_MS, KEY_SIZE};
use crate::keys::KeyManager;
use crate::record::LogRecord;
use crate::secret::Secret;

struct Dek {
    bytes: Secret<[u8; KEY_SIZE]>,
    created_epoch_ms: i64,
}

/// Owns the current DEK and rotates it on a wall-clock interval.
///
/// Steady-state encryption only needs a read of the current DEK; rotation
/// itself takes the lock and re-checks the age under it (double-check) so
/// concurrent encrypters racing the rotation boundary don't all rotate.
struct DekHolder {
    current: Mutex<Arc<Dek>>,
    clock: Arc<dyn ClockSource>,
}

impl DekHolder {
    fn new(clock: Arc<dyn ClockSource>) -> Result<Self> {
        let dek = Arc::new(Dek { bytes: Secret::new(random_key()?), created_epoch_ms: clock.now_epoch_ms() });
        Ok(Self { current: Mutex::new(dek), clock })
    }

    /// Returns the current DEK, rotating it first if it has aged out.
    fn current(&self) -> Result<Arc<Dek>> {
        let now = self.clock.now_epoch_ms();
        {
            let guard = self.current.lock();
            if now.saturating_sub(guard.created_epoch_ms) < DEK_ROTATION_INTERVAL_MS as i64 {
                return Ok(guard.clone());
            }
        }
        let mut guard = self.current.lock();
        if now.saturating_sub(guard.created_epoch_ms) < DEK_ROTATION_INTERVAL_MS as i64 {
            // Another thread already rotated while we waited for the lock.
            return Ok(guard.clone());
        }
        *guard = Arc::new(Dek { bytes: Secret::new(random_key()?), created_epoch_ms: now });
        Ok(guard.clone())
    }
}

fn random_key() -> Result<[u8; KEY_SIZE]> {
    let mut bytes = [0u8; KEY_SIZE];
    OsRng.try_fill_bytes(&mut bytes).map_err(|e| anyhow::anyhow!("rng failed: {e}"))?;
    Ok(bytes)
}

/// Applies C6's payload encryption and DEK wrapping, per `encrypt`/`decrypt`.
pub struct Envelope {
    dek_holder: DekHolder,
    key_manager: Arc<dyn KeyManager>,
}

impl Envelope {
    pub fn new(key_manager: Arc<dyn KeyManager>, clock: Arc<dyn ClockSource>) -> Result<Self> {
        Ok(Self { dek_holder: DekHolder::new(clock)?, key_manager })
    }

    /// Encrypts `rec`'s payload under the current DEK and wraps the DEK under
    /// the current KEK, replacing `payload` with `{"encrypted": ...}` and
    /// setting `encrypted_dek`.
    pub fn encrypt(&self, mut rec: LogRecord) -> Result<LogRecord> {
        let dek = self.dek_holder.current().context("rotating DEK")?;
        let kek = self.key_manager.get_kek().context("fetching KEK")?;

        let plaintext = serde_json::to_vec(&rec.payload).context("serializing payload for encryption")?;
        let wire = AesGcm::new(dek.bytes.expose_secret())?.encrypt(&plaintext).context("encrypting payload")?;
        let wrapped_dek = AesGcm::new(&kek)?.encrypt(dek.bytes.expose_secret()).context("wrapping DEK")?;

        let mut payload = crate::record::Fields::new();
        payload.insert("encrypted".into(), serde_json::Value::String(BASE64.encode(wire)));
        rec.payload = payload;
        rec.encrypted_dek = Some(BASE64.encode(wrapped_dek));
        Ok(rec)
    }

    /// Inverts [`Self::encrypt`]: unwraps the DEK under the current KEK, then
    /// decrypts the payload. For authorised tooling only; the pipeline's
    /// submit path never calls this.
    pub fn decrypt(&self, mut rec: LogRecord) -> Result<LogRecord> {
        let Some(wrapped_dek_b64) = rec.encrypted_dek.take() else {
            bail!("record has no encrypted_dek");
        };
        let encrypted = match rec.payload.get("encrypted") {
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => bail!("record payload missing \"encrypted\" field"),
        };

        let kek = self.key_manager.get_kek().context("fetching KEK")?;
        let wrapped_dek = BASE64.decode(wrapped_dek_b64).context("decoding wrapped DEK")?;
        let mut dek_bytes = AesGcm::new(&kek)?.decrypt(&wrapped_dek).context("unwrapping DEK")?;
        if dek_bytes.len() != KEY_SIZE {
            dek_bytes.zeroize();
            bail!("unwrapped DEK has unexpected length {}", dek_bytes.len());
        }
        let mut dek = [0u8; KEY_SIZE];
        dek.copy_from_slice(&dek_bytes);
        dek_bytes.zeroize();

        let wire = BASE64.decode(encrypted).context("decoding encrypted payload")?;
        let plaintext = AesGcm::new(&dek)?.decrypt(&wire).context("decrypting payload");
        dek.zeroize();
        let plaintext = plaintext?;

        rec.payload = serde_json::from_slice(&plaintext).context("parsing decrypted payload")?;
        Ok(rec)
    }
}

/// Only meaningful while the holder sits idle between rotations; exposed for
/// tests that want to observe rotation without sleeping a full hour.
#[cfg(test)]
struct RotationProbe<'a>(&'a DekHolder);

#[cfg(test)]
impl RotationProbe<'_> {
    fn created_at(&self) -> Result<i64> {
        Ok(self.0.current()?.created_epoch_ms)
    }
}
