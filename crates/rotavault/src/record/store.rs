//! Record storage contract
//!
//! Stores hold credential metadata and rotation attempt history. They never
//! see secret material, only the vault paths that point at it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Credential, CredentialId, CredentialStatus, RecordError, RotationAttempt};

/// Keyset cursor for paging through due credentials ordered by
/// `(next_rotation_due_at, id)` ascending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueCursor {
    pub due_at: DateTime<Utc>,
    pub id: CredentialId,
}

impl DueCursor {
    pub fn after(credential: &Credential) -> Option<Self> {
        credential.next_rotation_due_at.map(|due_at| Self {
            due_at,
            id: credential.id,
        })
    }
}

/// Persistence for credential records and their rotation attempts
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record, rejecting a second active credential for the same
    /// `(owner_ref, kind)` pair
    async fn insert(&self, credential: Credential) -> Result<(), RecordError>;

    async fn load(&self, id: CredentialId) -> Result<Credential, RecordError>;

    /// Atomically read-modify-write one row
    ///
    /// `f` runs under the row lock; when it errors the stored row is left
    /// unchanged. Returns the row as it was before `f` ran, so callers can
    /// hand back what a change displaced (e.g. the prior vault path).
    /// Load-then-store through separate calls would let a stale snapshot
    /// clobber a concurrent writer; this is the only write path for
    /// non-status fields.
    async fn mutate(
        &self,
        id: CredentialId,
        f: Box<dyn for<'a> FnOnce(&'a mut Credential) -> Result<(), RecordError> + Send>,
    ) -> Result<Credential, RecordError>;

    /// Atomically move `id` from `expected` to `next`, returning the updated
    /// record. Fails with [`RecordError::StatusConflict`] when another writer
    /// got there first.
    async fn compare_and_set_status(
        &self,
        id: CredentialId,
        expected: CredentialStatus,
        next: CredentialStatus,
    ) -> Result<Credential, RecordError>;

    /// One page of active, auto-rotating credentials due at or before
    /// `as_of`, ordered by `(next_rotation_due_at, id)`
    async fn due_page(
        &self,
        as_of: DateTime<Utc>,
        cursor: Option<DueCursor>,
        limit: usize,
    ) -> Result<Vec<Credential>, RecordError>;

    /// All records currently marked as rotating
    async fn in_progress(&self) -> Result<Vec<Credential>, RecordError>;

    /// Insert or update an attempt. A stored terminal attempt is immutable;
    /// overwriting one fails with [`RecordError::AttemptFinalized`].
    async fn put_attempt(&self, attempt: RotationAttempt) -> Result<(), RecordError>;

    /// The pending attempt for `id`, if one exists
    async fn live_attempt(&self, id: CredentialId) -> Result<Option<RotationAttempt>, RecordError>;

    /// Attempt history for `id`, oldest first
    async fn attempts_for(&self, id: CredentialId) -> Result<Vec<RotationAttempt>, RecordError>;
}
