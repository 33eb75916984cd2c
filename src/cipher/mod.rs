//! Cryptographic primitives reused by the envelope encryptor (C6) and the
//! fallback key manager.
//!
//! Kept from the original file-encryption tool: the AES-256-GCM wrapper
//! (nonce-prepend wire format) and the Argon2id key-derivation wrapper. The
//! dual-cipher (AES + XChaCha20) abstraction, BLAKE3 content hashing, and
//! HMAC module belonged to that tool's own container format and have no
//! counterpart here, so they are not carried forward.

mod aes_gcm;
mod derive;

pub use aes_gcm::AesGcm;
pub use derive::Derive;
