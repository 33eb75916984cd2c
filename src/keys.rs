//! Key manager (§6's `KeyManager` external interface) and the fallback
//! development-mode implementation described in §4.6.
//!
//! The real, network-backed KMS client is explicitly out of scope (§1) — the
//! core only ever calls `KeyManager::get_kek`. `FallbackKeyManager` exists so
//! the core is runnable without an external KMS (tests, local development)
//! and is grounded in the teacher's `cipher/derive.rs` Argon2id KDF plus
//! `secret.rs`'s zeroize-on-drop key wrapper.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail, ensure};
use parking_lot::Mutex;
use rand::rand_core::{OsRng, TryRngCore};

use crate::cipher::Derive;
use crate::clock::ClockSource;
use crate::config::{KEK_CACHE_TTL_MS, KEK_FILE_MODE, KEY_SIZE};

/// `get_kek` must be safe under concurrent call and implement its own
/// caching/rotation; the core never reaches around it.
pub trait KeyManager: Send + Sync {
    fn get_kek(&self) -> Result<[u8; KEY_SIZE]>;
}

struct KekCache {
    kek: [u8; KEY_SIZE],
    cached_at_epoch_ms: i64,
}

/// Derives and persists a KEK to local disk. A development/testing aid only —
/// `get_kek` logs a warning (once per process) every time it is used.
pub struct FallbackKeyManager {
    kek_path: PathBuf,
    seed_path: PathBuf,
    cache: Mutex<Option<KekCache>>,
    warned: AtomicBool,
    clock: std::sync::Arc<dyn ClockSource>,
}

/// Fixed, non-secret salt for the fallback KEK derivation. The seed file is
/// the actual secret; this salt only needs to be unique per deployment of the
/// scheme, not per key, since a compromised seed is already a full compromise
/// in this dev-only mode.
const FALLBACK_SALT: &[u8; 16] = b"securelog-fallbk";

impl FallbackKeyManager {
    pub fn new(kek_path: PathBuf, seed_path: PathBuf, clock: std::sync::Arc<dyn ClockSource>) -> Self {
        Self { kek_path, seed_path, cache: Mutex::new(None), warned: AtomicBool::new(false), clock }
    }

    fn warn_once(&self) {
        if !self.warned.swap(true, Ordering::SeqCst) {
            tracing::warn!(kek_path = %self.kek_path.display(), "using fallback key manager: not for production use");
        }
    }

    fn load_or_generate(&self) -> Result<[u8; KEY_SIZE]> {
        if self.kek_path.exists() {
            let bytes = fs::read(&self.kek_path).context("reading fallback KEK file")?;
            ensure!(bytes.len() == KEY_SIZE, "fallback KEK file corrupt: expected {KEY_SIZE} bytes, got {}", bytes.len());
            let mut kek = [0u8; KEY_SIZE];
            kek.copy_from_slice(&bytes);
            return Ok(kek);
        }

        let seed = self.load_or_generate_seed()?;
        // `Derive` produces a 64-byte key (sized for the teacher's dual-cipher
        // split); the fallback KEK only needs the first 32 bytes of it.
        let derived = Derive::new(&seed)?.derive_key(FALLBACK_SALT, 19_456, 2, 1)?;
        let mut kek = [0u8; KEY_SIZE];
        kek.copy_from_slice(&derived[..KEY_SIZE]);

        fs::write(&self.kek_path, kek).context("writing fallback KEK file")?;
        set_owner_only_permissions(&self.kek_path)?;
        Ok(kek)
    }

    fn load_or_generate_seed(&self) -> Result<[u8; 32]> {
        if self.seed_path.exists() {
            let bytes = fs::read(&self.seed_path).context("reading fallback seed file")?;
            ensure!(bytes.len() == 32, "fallback seed file corrupt: expected 32 bytes, got {}", bytes.len());
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&bytes);
            return Ok(seed);
        }
        let mut seed = [0u8; 32];
        OsRng.try_fill_bytes(&mut seed).map_err(|e| anyhow::anyhow!("rng failed: {e}"))?;
        fs::write(&self.seed_path, seed).context("writing fallback seed file")?;
        set_owner_only_permissions(&self.seed_path)?;
        Ok(seed)
    }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = fs::Permissions::from_mode(KEK_FILE_MODE);
    fs::set_permissions(path, perms).context("setting owner-only permissions")
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &std::path::Path) -> Result<()> {
    // No POSIX permission bits to set on non-Unix targets; the file still
    // lives in whatever directory the embedding application controls.
    Ok(())
}

impl KeyManager for FallbackKeyManager {
    fn get_kek(&self) -> Result<[u8; KEY_SIZE]> {
        self.warn_once();
        let mut cache = self.cache.lock();
        let now = self.clock.now_epoch_ms();
        if let Some(entry) = cache.as_ref() {
            if now.saturating_sub(entry.cached_at_epoch_ms) < KEK_CACHE_TTL_MS as i64 {
                return Ok(entry.kek);
            }
        }
        let kek = self.load_or_generate()?;
        *cache = Some(KekCache { kek, cached_at_epoch_ms: now });
        Ok(kek)
    }
}

/// A `KeyManager` for tests: returns a fixed key, never touches disk.
pub struct StaticKeyManager(pub [u8; KEY_SIZE]);

impl KeyManager for StaticKeyManager {
    fn get_kek(&self) -> Result<[u8; KEY_SIZE]> {
        Ok(self.0)
    }
}

/// A `KeyManager` that always fails, for exercising C6's crypto-failure path.
pub struct FailingKeyManager;

impl KeyManager for FailingKeyManager {
    fn get_kek(&self) -> Result<[u8; KEY_SIZE]> {
        bail!("key manager unavailable")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::clock::SystemClock;

    #[test]
    fn fallback_manager_persists_and_reloads_same_kek() {
        let dir = tempdir().unwrap();
        let kek_path = dir.path().join("kek.bin");
        let seed_path = dir.path().join("seed.bin");
        let clock: Arc<dyn ClockSource> = Arc::new(SystemClock);

        let manager = FallbackKeyManager::new(kek_path.clone(), seed_path.clone(), clock.clone());
        let kek1 = manager.get_kek().unwrap();

        let manager2 = FallbackKeyManager::new(kek_path, seed_path, clock);
        let kek2 = manager2.get_kek().unwrap();

        assert_eq!(kek1, kek2);
    }

    #[test]
    fn fallback_manager_rejects_corrupt_kek_file() {
        let dir = tempdir().unwrap();
        let kek_path = dir.path().join("kek.bin");
        let seed_path = dir.path().join("seed.bin");
        fs::write(&kek_path, [0u8; 10]).unwrap();
        let clock: Arc<dyn ClockSource> = Arc::new(SystemClock);
        let manager = FallbackKeyManager::new(kek_path, seed_path, clock);
        assert!(manager.get_kek().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn fallback_kek_file_has_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let kek_path = dir.path().join("kek.bin");
        let seed_path = dir.path().join("seed.bin");
        let clock: Arc<dyn ClockSource> = Arc::new(SystemClock);
        let manager = FallbackKeyManager::new(kek_path.clone(), seed_path, clock);
        manager.get_kek().unwrap();
        let mode = fs::metadata(&kek_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, KEK_FILE_MODE);
    }
}
