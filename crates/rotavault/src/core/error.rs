//! Error types, one layer per enum
//!
//! - [`CipherError`]: authenticated encryption failures; always fail closed
//! - [`VaultError`]: backend adapter and facade outcomes
//! - [`RecordError`]: metadata store and lifecycle transitions
//! - [`DirectoryError`]: the external directory-service call
//! - [`RotationError`]: orchestrator-level terminal failures
//! - [`EngineError`]: top-level wrapper returned by the engine facade
//!
//! `AlreadyRotating` and `StatusConflict` are expected concurrency outcomes,
//! not faults: a caller losing the `begin_rotation` race backs off silently.

use thiserror::Error;

use super::id::CredentialId;
use crate::core::credential::{CredentialKind, CredentialStatus};

/// Authenticated-encryption failures
///
/// `open` never yields partial plaintext; every malformed or tampered blob
/// collapses into [`CipherError::DecryptionFailed`] or
/// [`CipherError::MalformedBlob`].
#[derive(Debug, Error)]
pub enum CipherError {
    /// Tag mismatch, wrong key, or corrupted ciphertext
    #[error("decryption failed: tag mismatch or wrong master key")]
    DecryptionFailed,

    /// Encryption could not be performed
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Blob too short or structurally invalid
    #[error("malformed ciphertext blob")]
    MalformedBlob,

    /// Blob was produced by an unknown format version
    #[error("unsupported blob format version {0}")]
    UnsupportedVersion(u8),

    /// Master key material has the wrong length
    #[error("master key must be {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required key length
        expected: usize,
        /// Supplied key length
        actual: usize,
    },
}

/// Backend adapter and vault facade outcomes
#[derive(Debug, Error)]
pub enum VaultError {
    /// No entry at the given vault path (includes retired entries)
    #[error("vault entry '{path}' not found")]
    NotFound {
        /// The vault path that was requested
        path: String,
    },

    /// Write-once violation: the path already holds a different version
    #[error("vault entry '{path}' already exists and is immutable")]
    AlreadyExists {
        /// The colliding vault path
        path: String,
    },

    /// Transient backend failure; retried with backoff by the orchestrator
    #[error("backend unavailable: {reason}")]
    Unavailable {
        /// Human-readable cause (I/O error, HTTP status, timeout)
        reason: String,
    },

    /// Sealing or opening the secret payload failed
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

impl VaultError {
    /// Whether the orchestrator may retry this failure
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Metadata store and credential lifecycle errors
#[derive(Debug, Error)]
pub enum RecordError {
    /// No credential row with this id
    #[error("credential '{id}' not found")]
    NotFound {
        /// Requested credential id
        id: CredentialId,
    },

    /// An Active credential already exists for this (owner_ref, kind) pair
    #[error("an active {kind} credential already exists for owner '{owner_ref}'")]
    DuplicateActiveCredential {
        /// External identity reference
        owner_ref: String,
        /// Credential kind
        kind: CredentialKind,
    },

    /// Another worker owns the in-flight rotation; back off without side effects
    #[error("credential '{id}' is already rotating")]
    AlreadyRotating {
        /// Contended credential id
        id: CredentialId,
    },

    /// Atomic status transition lost: the row was not in the expected status
    #[error("credential '{id}' status is {actual}, expected {expected}")]
    StatusConflict {
        /// Contended credential id
        id: CredentialId,
        /// Status the caller expected
        expected: CredentialStatus,
        /// Status actually found
        actual: CredentialStatus,
    },

    /// Illegal lifecycle transition
    #[error("credential '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        /// Credential id
        id: CredentialId,
        /// Current status
        from: CredentialStatus,
        /// Requested status
        to: CredentialStatus,
    },

    /// A rotation attempt with a terminal outcome is immutable
    #[error("rotation attempt for credential '{id}' already reached a terminal outcome")]
    AttemptFinalized {
        /// Credential the attempt belongs to
        id: CredentialId,
    },

    /// Underlying store failure
    #[error("metadata store failure: {reason}")]
    Store {
        /// Human-readable cause
        reason: String,
    },
}

/// Outcomes of the external directory-service call
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Retryable failure (throttling, 5xx, timeout)
    #[error("directory service transiently unavailable: {reason}")]
    Transient {
        /// Human-readable cause
        reason: String,
    },

    /// Non-retryable failure (identity missing, request rejected)
    #[error("directory service rejected the update: {reason}")]
    Permanent {
        /// Human-readable cause
        reason: String,
    },
}

/// Orchestrator-level rotation failures
#[derive(Debug, Error)]
pub enum RotationError {
    /// Retry budget exhausted on transient failures
    #[error("rotation gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Total attempts made (initial try plus retries)
        attempts: u32,
        /// The failure observed on the final attempt
        last_error: String,
    },

    /// The directory service reported a permanent failure
    #[error("external apply failed permanently: {reason}")]
    PermanentApply {
        /// Human-readable cause
        reason: String,
    },

    /// Illegal step transition in the rotation state machine
    #[error("invalid rotation step transition {from} -> {to}")]
    InvalidStep {
        /// Current step
        from: String,
        /// Requested step
        to: String,
    },

    /// Metadata lifecycle failure during rotation
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Vault failure that was not retryable
    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Top-level error returned by [`RotationEngine`](crate::engine::RotationEngine)
#[derive(Debug, Error)]
pub enum EngineError {
    /// Metadata store or lifecycle error
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Vault backend or cipher error
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// Rotation orchestrator error
    #[error(transparent)]
    Rotation(#[from] RotationError),

    /// Engine configuration error
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Audit sink failure
    #[error("audit sink failure: {reason}")]
    Audit {
        /// Human-readable cause
        reason: String,
    },
}

/// Result alias for engine-level operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_unavailable_is_transient() {
        let err = VaultError::Unavailable {
            reason: "connection refused".to_string(),
        };
        assert!(err.is_transient());

        let err = VaultError::NotFound {
            path: "a/b".to_string(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn cipher_error_converts_into_vault_error() {
        let err: VaultError = CipherError::DecryptionFailed.into();
        assert!(matches!(err, VaultError::Cipher(_)));
        assert!(err.to_string().contains("decryption failed"));
    }

    #[test]
    fn record_errors_render_the_credential_id() {
        let id = CredentialId::generate();
        let err = RecordError::AlreadyRotating { id: id.clone() };
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn rotation_error_wraps_lower_layers() {
        let err: RotationError = VaultError::Unavailable {
            reason: "503".to_string(),
        }
        .into();
        assert!(matches!(err, RotationError::Vault(_)));

        let top: EngineError = err.into();
        assert!(matches!(top, EngineError::Rotation(_)));
    }
}
