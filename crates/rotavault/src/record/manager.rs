//! Credential lifecycle management on top of a [`RecordStore`]
//!
//! All status movement funnels through the store's compare-and-set, so two
//! workers racing on the same credential resolve to exactly one winner.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::core::{
    Credential, CredentialId, CredentialKind, CredentialStatus, RecordError, RotationAttempt,
    RotationPolicy, VaultPath,
};

use super::store::{DueCursor, RecordStore};

/// Lifecycle operations over credential records
#[derive(Clone)]
pub struct RecordManager {
    store: Arc<dyn RecordStore>,
}

impl RecordManager {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Register a new credential whose initial secret already lives at
    /// `initial_path`
    pub async fn create(
        &self,
        owner_ref: impl Into<String>,
        kind: CredentialKind,
        policy: RotationPolicy,
        initial_path: VaultPath,
        now: DateTime<Utc>,
    ) -> Result<Credential, RecordError> {
        policy.validate()?;
        let credential = Credential::new(owner_ref, kind, initial_path, policy, now);
        self.store.insert(credential.clone()).await?;
        info!(credential_id = %credential.id, kind = %kind, "credential registered");
        Ok(credential)
    }

    pub async fn get(&self, id: CredentialId) -> Result<Credential, RecordError> {
        self.store.load(id).await
    }

    /// Cursor over credentials due for rotation at `as_of`
    pub fn due_for_rotation(&self, as_of: DateTime<Utc>, page_size: usize) -> DueCredentials {
        DueCredentials {
            store: Arc::clone(&self.store),
            as_of,
            page_size,
            cursor: None,
            exhausted: false,
        }
    }

    /// Claim `id` for rotation
    ///
    /// Exactly one of any number of concurrent callers wins; losers get
    /// [`RecordError::AlreadyRotating`] and must not touch the credential.
    pub async fn begin_rotation(&self, id: CredentialId) -> Result<Credential, RecordError> {
        let result = self
            .store
            .compare_and_set_status(
                id,
                CredentialStatus::Active,
                CredentialStatus::RotationInProgress,
            )
            .await;
        match result {
            Ok(credential) => Ok(credential),
            Err(RecordError::StatusConflict {
                id,
                actual: CredentialStatus::RotationInProgress,
                ..
            }) => Err(RecordError::AlreadyRotating { id }),
            Err(RecordError::StatusConflict { id, actual, .. }) => {
                Err(RecordError::InvalidTransition {
                    id,
                    from: actual,
                    to: CredentialStatus::RotationInProgress,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Finish a rotation: swap in the new version and reschedule
    ///
    /// Returns the previous vault path so the caller can retire it. The
    /// status check, the version bump check, and the swap all run inside one
    /// atomic store mutation so a commit cannot race the record changing
    /// underneath.
    pub async fn commit_rotation(
        &self,
        id: CredentialId,
        new_path: VaultPath,
        new_version: u32,
        now: DateTime<Utc>,
    ) -> Result<VaultPath, RecordError> {
        let before = self
            .store
            .mutate(
                id,
                Box::new(move |credential| {
                    if credential.status != CredentialStatus::RotationInProgress {
                        return Err(RecordError::StatusConflict {
                            id,
                            expected: CredentialStatus::RotationInProgress,
                            actual: credential.status,
                        });
                    }
                    if new_version != credential.version + 1 {
                        return Err(RecordError::Store {
                            reason: format!(
                                "commit expected version {} but record is at {}",
                                new_version, credential.version
                            ),
                        });
                    }
                    credential.vault_path = new_path;
                    credential.version = new_version;
                    credential.status = CredentialStatus::Active;
                    credential.last_rotated_at = Some(now);
                    credential.rotation_count = credential.rotation_count.saturating_add(1);
                    credential.schedule_next_rotation(now);
                    Ok(())
                }),
            )
            .await?;
        info!(credential_id = %id, version = new_version, "rotation committed");
        Ok(before.vault_path)
    }

    /// Release a claimed credential unchanged after a failed rotation
    pub async fn abort_rotation(&self, id: CredentialId) -> Result<Credential, RecordError> {
        self.store
            .compare_and_set_status(
                id,
                CredentialStatus::RotationInProgress,
                CredentialStatus::Active,
            )
            .await
    }

    /// Decommission a credential
    pub async fn retire(&self, id: CredentialId) -> Result<Credential, RecordError> {
        let credential = self.store.load(id).await?;
        match credential.status {
            CredentialStatus::Active | CredentialStatus::Expired => self
                .store
                .compare_and_set_status(id, credential.status, CredentialStatus::Retired)
                .await,
            CredentialStatus::Retired => Ok(credential),
            CredentialStatus::RotationInProgress => Err(RecordError::InvalidTransition {
                id,
                from: credential.status,
                to: CredentialStatus::Retired,
            }),
        }
    }

    /// Mark an Active credential past its hard expiry as Expired
    pub async fn mark_expired(&self, id: CredentialId) -> Result<Credential, RecordError> {
        self.store
            .compare_and_set_status(id, CredentialStatus::Active, CredentialStatus::Expired)
            .await
    }

    /// Set or clear the hard expiry on a credential
    pub async fn set_expiry(
        &self,
        id: CredentialId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Credential, RecordError> {
        // The store hands back the pre-image; mirror the change onto it.
        let mut credential = self
            .store
            .mutate(
                id,
                Box::new(move |credential| {
                    credential.expires_at = expires_at;
                    Ok(())
                }),
            )
            .await?;
        credential.expires_at = expires_at;
        Ok(credential)
    }

    /// Record a plaintext fetch for usage tracking
    pub async fn record_fetch(
        &self,
        id: CredentialId,
        now: DateTime<Utc>,
    ) -> Result<(), RecordError> {
        self.store
            .mutate(
                id,
                Box::new(move |credential| {
                    credential.fetch_count = credential.fetch_count.saturating_add(1);
                    credential.last_fetched_at = Some(now);
                    Ok(())
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn put_attempt(&self, attempt: RotationAttempt) -> Result<(), RecordError> {
        self.store.put_attempt(attempt).await
    }

    pub async fn live_attempt(
        &self,
        id: CredentialId,
    ) -> Result<Option<RotationAttempt>, RecordError> {
        self.store.live_attempt(id).await
    }

    pub async fn attempts_for(
        &self,
        id: CredentialId,
    ) -> Result<Vec<RotationAttempt>, RecordError> {
        self.store.attempts_for(id).await
    }

    /// Close out rotations orphaned by a crash
    ///
    /// Any credential still marked RotationInProgress at startup belongs to a
    /// process that no longer exists. Its pending attempt is closed as
    /// Abandoned and the credential reverts to Active on its previous secret,
    /// which was never retired.
    pub async fn recover_abandoned(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CredentialId>, RecordError> {
        let orphaned = self.store.in_progress().await?;
        let mut recovered = Vec::with_capacity(orphaned.len());

        for credential in orphaned {
            if let Some(mut attempt) = self.store.live_attempt(credential.id).await? {
                attempt.mark_abandoned(now)?;
                self.store.put_attempt(attempt).await?;
            }
            match self.abort_rotation(credential.id).await {
                Ok(_) => {
                    warn!(credential_id = %credential.id, "recovered abandoned rotation");
                    recovered.push(credential.id);
                }
                // Someone else moved the row between the scan and the CAS.
                Err(RecordError::StatusConflict { .. }) => {}
                Err(other) => return Err(other),
            }
        }
        Ok(recovered)
    }
}

impl std::fmt::Debug for RecordManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordManager").finish_non_exhaustive()
    }
}

/// Streaming cursor over due credentials, page by page
pub struct DueCredentials {
    store: Arc<dyn RecordStore>,
    as_of: DateTime<Utc>,
    page_size: usize,
    cursor: Option<DueCursor>,
    exhausted: bool,
}

impl DueCredentials {
    /// The next page, empty once the set is exhausted
    pub async fn next_page(&mut self) -> Result<Vec<Credential>, RecordError> {
        if self.exhausted {
            return Ok(Vec::new());
        }
        let page = self
            .store
            .due_page(self.as_of, self.cursor, self.page_size)
            .await?;
        match page.last() {
            Some(last) => self.cursor = DueCursor::after(last),
            None => self.exhausted = true,
        }
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::memory::MemoryRecordStore;

    fn manager() -> RecordManager {
        RecordManager::new(Arc::new(MemoryRecordStore::new()))
    }

    async fn seed(manager: &RecordManager) -> Credential {
        manager
            .create(
                "svc-reporting",
                CredentialKind::Password,
                RotationPolicy::default(),
                VaultPath::new("svc-reporting/password/v1"),
                Utc::now(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn begin_commit_swaps_version_and_path() {
        let manager = manager();
        let cred = seed(&manager).await;

        let claimed = manager.begin_rotation(cred.id).await.unwrap();
        assert_eq!(claimed.status, CredentialStatus::RotationInProgress);

        let now = Utc::now();
        let previous = manager
            .commit_rotation(cred.id, VaultPath::new("svc-reporting/password/v2"), 2, now)
            .await
            .unwrap();
        assert_eq!(previous, cred.vault_path);

        let after = manager.get(cred.id).await.unwrap();
        assert_eq!(after.status, CredentialStatus::Active);
        assert_eq!(after.version, 2);
        assert_eq!(after.rotation_count, 1);
        assert_eq!(after.last_rotated_at, Some(now));
        assert!(after.next_rotation_due_at > cred.next_rotation_due_at);
    }

    #[tokio::test]
    async fn fetch_tracking_cannot_clobber_a_concurrent_commit() {
        let manager = manager();
        let cred = seed(&manager).await;
        manager.begin_rotation(cred.id).await.unwrap();

        let new_path = VaultPath::new("svc-reporting/password/v2");
        let (fetched, committed) = tokio::join!(
            manager.record_fetch(cred.id, Utc::now()),
            manager.commit_rotation(cred.id, new_path.clone(), 2, Utc::now()),
        );
        fetched.unwrap();
        committed.unwrap();

        // Whichever order the two writes landed in, neither erased the other.
        let after = manager.get(cred.id).await.unwrap();
        assert_eq!(after.version, 2);
        assert_eq!(after.status, CredentialStatus::Active);
        assert_eq!(after.vault_path, new_path);
        assert_eq!(after.fetch_count, 1);
    }

    #[tokio::test]
    async fn second_begin_sees_already_rotating() {
        let manager = manager();
        let cred = seed(&manager).await;

        manager.begin_rotation(cred.id).await.unwrap();
        let err = manager.begin_rotation(cred.id).await.unwrap_err();
        assert!(matches!(err, RecordError::AlreadyRotating { .. }));
    }

    #[tokio::test]
    async fn abort_restores_active_with_old_version() {
        let manager = manager();
        let cred = seed(&manager).await;

        manager.begin_rotation(cred.id).await.unwrap();
        manager.abort_rotation(cred.id).await.unwrap();

        let after = manager.get(cred.id).await.unwrap();
        assert_eq!(after.status, CredentialStatus::Active);
        assert_eq!(after.version, cred.version);
        assert_eq!(after.vault_path, cred.vault_path);
    }

    #[tokio::test]
    async fn commit_rejects_wrong_version() {
        let manager = manager();
        let cred = seed(&manager).await;
        manager.begin_rotation(cred.id).await.unwrap();

        let err = manager
            .commit_rotation(cred.id, VaultPath::new("p/v5"), 5, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::Store { .. }));
    }

    #[tokio::test]
    async fn retire_is_idempotent_but_blocked_mid_rotation() {
        let manager = manager();
        let cred = seed(&manager).await;

        manager.retire(cred.id).await.unwrap();
        let again = manager.retire(cred.id).await.unwrap();
        assert_eq!(again.status, CredentialStatus::Retired);

        let other = seed(&manager).await;
        manager.begin_rotation(other.id).await.unwrap();
        assert!(matches!(
            manager.retire(other.id).await.unwrap_err(),
            RecordError::InvalidTransition { .. }
        ));
    }

    #[tokio::test]
    async fn recover_abandoned_closes_attempt_and_reactivates() {
        let manager = manager();
        let cred = seed(&manager).await;

        manager.begin_rotation(cred.id).await.unwrap();
        let attempt = RotationAttempt::begin(cred.id, 1, Utc::now());
        manager.put_attempt(attempt).await.unwrap();

        let recovered = manager.recover_abandoned(Utc::now()).await.unwrap();
        assert_eq!(recovered, vec![cred.id]);

        let after = manager.get(cred.id).await.unwrap();
        assert_eq!(after.status, CredentialStatus::Active);
        assert_eq!(after.vault_path, cred.vault_path);

        let history = manager.attempts_for(cred.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, crate::core::AttemptOutcome::Abandoned);
        assert!(manager.live_attempt(cred.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn due_cursor_walks_all_pages() {
        let manager = manager();
        for i in 0..7 {
            manager
                .create(
                    format!("svc-{i}"),
                    CredentialKind::Password,
                    RotationPolicy {
                        interval_days: 1,
                        ..RotationPolicy::default()
                    },
                    VaultPath::new(format!("svc-{i}/password/v1")),
                    Utc::now() - chrono::Duration::days(3),
                )
                .await
                .unwrap();
        }

        let mut due = manager.due_for_rotation(Utc::now(), 3);
        let mut total = 0;
        loop {
            let page = due.next_page().await.unwrap();
            if page.is_empty() {
                break;
            }
            total += page.len();
        }
        assert_eq!(total, 7);
    }
}
