//! In-memory record store
//!
//! Concurrency model: per-row atomicity comes from the map's entry API, so
//! `compare_and_set_status` is a real CAS. The cross-row invariant (one
//! Active credential per `(owner_ref, kind)`) is guarded by a mutex around
//! insert, since it spans rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::core::{
    AttemptId, Credential, CredentialId, CredentialStatus, RecordError, RotationAttempt,
};

use super::store::{DueCursor, RecordStore};

/// Map-backed [`RecordStore`] for tests and single-process deployments
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    credentials: DashMap<CredentialId, Credential>,
    attempts: DashMap<AttemptId, RotationAttempt>,
    insert_guard: Mutex<()>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, credential: Credential) -> Result<(), RecordError> {
        let _guard = self.insert_guard.lock();

        let duplicate = self.credentials.iter().any(|row| {
            row.status == CredentialStatus::Active
                && row.owner_ref == credential.owner_ref
                && row.kind == credential.kind
        });
        if duplicate && credential.status == CredentialStatus::Active {
            return Err(RecordError::DuplicateActiveCredential {
                owner_ref: credential.owner_ref,
                kind: credential.kind,
            });
        }

        self.credentials.insert(credential.id, credential);
        Ok(())
    }

    async fn load(&self, id: CredentialId) -> Result<Credential, RecordError> {
        self.credentials
            .get(&id)
            .map(|row| row.clone())
            .ok_or(RecordError::NotFound { id })
    }

    async fn mutate(
        &self,
        id: CredentialId,
        f: Box<dyn for<'a> FnOnce(&'a mut Credential) -> Result<(), RecordError> + Send>,
    ) -> Result<Credential, RecordError> {
        match self.credentials.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let before = entry.get().clone();
                // Mutate a scratch copy so a failed closure cannot leave a
                // half-applied row behind.
                let mut candidate = before.clone();
                f(&mut candidate)?;
                entry.insert(candidate);
                Ok(before)
            }
            dashmap::mapref::entry::Entry::Vacant(_) => Err(RecordError::NotFound { id }),
        }
    }

    async fn compare_and_set_status(
        &self,
        id: CredentialId,
        expected: CredentialStatus,
        next: CredentialStatus,
    ) -> Result<Credential, RecordError> {
        match self.credentials.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let actual = entry.get().status;
                if actual != expected {
                    return Err(RecordError::StatusConflict {
                        id,
                        expected,
                        actual,
                    });
                }
                entry.get_mut().status = next;
                Ok(entry.get().clone())
            }
            dashmap::mapref::entry::Entry::Vacant(_) => Err(RecordError::NotFound { id }),
        }
    }

    async fn due_page(
        &self,
        as_of: DateTime<Utc>,
        cursor: Option<DueCursor>,
        limit: usize,
    ) -> Result<Vec<Credential>, RecordError> {
        let mut due: Vec<Credential> = self
            .credentials
            .iter()
            .filter(|row| row.is_due(as_of))
            .filter(|row| match (&cursor, row.next_rotation_due_at) {
                (Some(cursor), Some(due_at)) => {
                    (due_at, row.id.to_string()) > (cursor.due_at, cursor.id.to_string())
                }
                (None, _) => true,
                (_, None) => false,
            })
            .map(|row| row.clone())
            .collect();

        due.sort_by(|a, b| {
            (a.next_rotation_due_at, a.id.to_string())
                .cmp(&(b.next_rotation_due_at, b.id.to_string()))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn in_progress(&self) -> Result<Vec<Credential>, RecordError> {
        Ok(self
            .credentials
            .iter()
            .filter(|row| row.status == CredentialStatus::RotationInProgress)
            .map(|row| row.clone())
            .collect())
    }

    async fn put_attempt(&self, attempt: RotationAttempt) -> Result<(), RecordError> {
        match self.attempts.entry(attempt.id) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if entry.get().outcome.is_terminal() {
                    return Err(RecordError::AttemptFinalized {
                        id: attempt.credential_id,
                    });
                }
                entry.insert(attempt);
                Ok(())
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(attempt);
                Ok(())
            }
        }
    }

    async fn live_attempt(&self, id: CredentialId) -> Result<Option<RotationAttempt>, RecordError> {
        Ok(self
            .attempts
            .iter()
            .find(|attempt| attempt.credential_id == id && attempt.is_live())
            .map(|attempt| attempt.clone()))
    }

    async fn attempts_for(&self, id: CredentialId) -> Result<Vec<RotationAttempt>, RecordError> {
        let mut history: Vec<RotationAttempt> = self
            .attempts
            .iter()
            .filter(|attempt| attempt.credential_id == id)
            .map(|attempt| attempt.clone())
            .collect();
        history.sort_by_key(|attempt| (attempt.started_at, attempt.attempt_number));
        Ok(history)
    }
}
