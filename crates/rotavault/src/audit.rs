//! Append-only audit trail
//!
//! Every vault-affecting operation lands here with who, what, when, and
//! outcome. Entries carry a SHA-256 checksum computed at construction so
//! after-the-fact edits to a persisted entry are detectable. Secret material
//! never appears in an entry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::core::CredentialId;

/// Who performed an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "name")]
pub enum AuditActor {
    /// The background rotation scheduler
    Scheduler,
    /// A named human or service principal
    Operator(String),
}

impl std::fmt::Display for AuditActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduler => f.write_str("scheduler"),
            Self::Operator(name) => write!(f, "operator:{name}"),
        }
    }
}

/// What was done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Store,
    Fetch,
    Rotate,
    Retire,
    Recover,
}

impl std::fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Store => "store",
            Self::Fetch => "fetch",
            Self::Rotate => "rotate",
            Self::Retire => "retire",
            Self::Recover => "recover",
        };
        f.write_str(s)
    }
}

/// How it went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
}

/// One immutable audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: AuditActor,
    pub operation: AuditOperation,
    pub credential_id: CredentialId,
    pub result: AuditResult,
    /// Free-form context; never secret material
    pub detail: Option<String>,
    /// SHA-256 over the other fields, hex-encoded
    pub checksum: String,
}

impl AuditEntry {
    pub fn new(
        actor: AuditActor,
        operation: AuditOperation,
        credential_id: CredentialId,
        result: AuditResult,
        detail: Option<String>,
    ) -> Self {
        let timestamp = Utc::now();
        let checksum = Self::compute_checksum(
            timestamp,
            &actor,
            operation,
            credential_id,
            result,
            detail.as_deref(),
        );
        Self {
            timestamp,
            actor,
            operation,
            credential_id,
            result,
            detail,
            checksum,
        }
    }

    fn compute_checksum(
        timestamp: DateTime<Utc>,
        actor: &AuditActor,
        operation: AuditOperation,
        credential_id: CredentialId,
        result: AuditResult,
        detail: Option<&str>,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(timestamp.to_rfc3339().as_bytes());
        hasher.update(actor.to_string().as_bytes());
        hasher.update(operation.to_string().as_bytes());
        hasher.update(credential_id.to_string().as_bytes());
        hasher.update(match result {
            AuditResult::Success => b"success".as_slice(),
            AuditResult::Failure => b"failure".as_slice(),
        });
        hasher.update(detail.unwrap_or("").as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// Whether the stored checksum still matches the fields
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        self.checksum
            == Self::compute_checksum(
                self.timestamp,
                &self.actor,
                self.operation,
                self.credential_id,
                self.result,
                self.detail.as_deref(),
            )
    }
}

/// Audit trail failures
#[derive(Debug, Error)]
pub enum AuditError {
    /// The sink could not persist the entry
    #[error("audit sink failure: {reason}")]
    Sink {
        /// Human-readable cause
        reason: String,
    },
}

/// Destination for audit entries
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one entry; the trail is append-only
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// In-memory audit trail for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: parking_lot::Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the trail, oldest first
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditError> {
        info!(
            actor = %entry.actor,
            operation = %entry.operation,
            credential_id = %entry.credential_id,
            result = ?entry.result,
            "audit"
        );
        self.entries.lock().push(entry);
        Ok(())
    }
}

/// JSON-lines audit trail on disk
pub struct FileAuditSink {
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl FileAuditSink {
    /// Open (or create) the trail at `path` in append mode
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self, AuditError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .await
            .map_err(|e| AuditError::Sink {
                reason: format!("cannot open audit file: {e}"),
            })?;
        Ok(Self {
            file: tokio::sync::Mutex::new(file),
        })
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditError> {
        info!(
            actor = %entry.actor,
            operation = %entry.operation,
            credential_id = %entry.credential_id,
            result = ?entry.result,
            "audit"
        );
        let mut line = serde_json::to_vec(&entry).map_err(|e| AuditError::Sink {
            reason: format!("cannot serialize audit entry: {e}"),
        })?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await.map_err(|e| AuditError::Sink {
            reason: format!("cannot write audit entry: {e}"),
        })?;
        file.flush().await.map_err(|e| AuditError::Sink {
            reason: format!("cannot flush audit entry: {e}"),
        })
    }
}

impl std::fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAuditSink").finish_non_exhaustive()
    }
}
