//! Authenticated encryption of secret payloads
//!
//! AES-256-GCM with a random 96-bit nonce per call. Blob layout:
//!
//! ```text
//! [ version: 1 byte ][ nonce: 12 bytes ][ ciphertext || tag ]
//! ```
//!
//! [`open`] fails closed: tag mismatch, truncation, and unknown versions all
//! yield an error and never partial plaintext. The master key is supplied by
//! the embedding application at startup and is never persisted here.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::CipherError;

/// Master key length in bytes (AES-256)
pub const KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const BLOB_VERSION: u8 = 1;

/// The process-wide master encryption key
///
/// Read-only after startup, zeroized on drop, redacted in Debug output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Build a key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != KEY_LEN {
            return Err(CipherError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Build a key from standard base64
    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let mut decoded = BASE64
            .decode(encoded.trim())
            .map_err(|_| CipherError::MalformedBlob)?;
        let key = Self::from_bytes(&decoded);
        decoded.zeroize();
        key
    }

    /// Generate a random key (setup tooling and tests)
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(***)")
    }
}

/// Encrypt `plaintext` under `key`, producing a self-contained blob
pub fn seal(key: &MasterKey, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CipherError::EncryptionFailed("AEAD encryption error".to_string()))?;

    let mut blob = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
    blob.push(BLOB_VERSION);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a blob produced by [`seal`], verifying the integrity tag
pub fn open(key: &MasterKey, blob: &[u8]) -> Result<Vec<u8>, CipherError> {
    if blob.len() < 1 + NONCE_LEN {
        return Err(CipherError::MalformedBlob);
    }
    if blob[0] != BLOB_VERSION {
        return Err(CipherError::UnsupportedVersion(blob[0]));
    }

    let (nonce, ciphertext) = blob[1..].split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CipherError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips() {
        let key = MasterKey::generate();
        let blob = seal(&key, b"correct horse battery staple").unwrap();
        let plain = open(&key, &blob).unwrap();
        assert_eq!(plain, b"correct horse battery staple");
    }

    #[test]
    fn nonce_differs_per_call() {
        let key = MasterKey::generate();
        let a = seal(&key, b"same").unwrap();
        let b = seal(&key, b"same").unwrap();
        assert_ne!(a, b, "two seals of the same plaintext must differ");
    }

    #[test]
    fn tampered_blob_fails_closed() {
        let key = MasterKey::generate();
        let mut blob = seal(&key, b"secret").unwrap();

        // Flip one ciphertext bit
        let last = blob.len() - 1;
        blob[last] ^= 0x01;

        assert!(matches!(
            open(&key, &blob),
            Err(CipherError::DecryptionFailed)
        ));
    }

    #[test]
    fn wrong_key_fails_closed() {
        let blob = seal(&MasterKey::generate(), b"secret").unwrap();
        assert!(matches!(
            open(&MasterKey::generate(), &blob),
            Err(CipherError::DecryptionFailed)
        ));
    }

    #[test]
    fn truncated_and_versioned_blobs_are_rejected() {
        let key = MasterKey::generate();
        assert!(matches!(
            open(&key, &[BLOB_VERSION; 5]),
            Err(CipherError::MalformedBlob)
        ));

        let mut blob = seal(&key, b"x").unwrap();
        blob[0] = 9;
        assert!(matches!(
            open(&key, &blob),
            Err(CipherError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn key_length_is_enforced() {
        assert!(matches!(
            MasterKey::from_bytes(&[0u8; 16]),
            Err(CipherError::InvalidKeyLength {
                expected: 32,
                actual: 16
            })
        ));
    }

    #[test]
    fn base64_key_round_trip() {
        let raw = [7u8; KEY_LEN];
        let encoded = BASE64.encode(raw);
        let key = MasterKey::from_base64(&encoded).unwrap();
        let blob = seal(&key, b"via base64").unwrap();
        assert_eq!(open(&key, &blob).unwrap(), b"via base64");
    }
}
