//! Rotation orchestrator
//!
//! Drives one credential through generate, external apply, verify, and
//! commit. Ordering is the whole game here:
//!
//! - the new secret reaches the vault and the directory before the record
//!   commits, so a crash at any point leaves the old secret authoritative;
//! - the terminal attempt row is written before the credential leaves
//!   RotationInProgress, so observers never see an Active credential with a
//!   live attempt;
//! - the old vault version is retired only after the commit, and a retire
//!   failure demotes to a warning because the rotation itself already
//!   succeeded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditActor, AuditEntry, AuditOperation, AuditResult, AuditSink};
use crate::core::{
    Credential, CredentialId, DirectoryError, EngineError, RecordError, RotationAttempt,
    RotationError, SecretString, VaultError, VaultPath,
};
use crate::directory::DirectoryService;
use crate::record::RecordManager;
use crate::rotation::generate::{generate_secret, ComplexityProfile};
use crate::rotation::state::RotationStep;
use crate::vault::Vault;

/// Executes rotations against the vault, directory, and record store
pub struct Orchestrator {
    vault: Arc<Vault>,
    records: RecordManager,
    directory: Arc<dyn DirectoryService>,
    audit: Arc<dyn AuditSink>,
    complexity: ComplexityProfile,
    io_timeout: Duration,
    verify_after_apply: bool,
}

enum TryFailure {
    Transient(String),
    Permanent(String),
}

impl Orchestrator {
    pub fn new(
        vault: Arc<Vault>,
        records: RecordManager,
        directory: Arc<dyn DirectoryService>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            vault,
            records,
            directory,
            audit,
            complexity: ComplexityProfile::default(),
            io_timeout: Duration::from_secs(10),
            verify_after_apply: true,
        }
    }

    pub fn with_complexity(mut self, complexity: ComplexityProfile) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn with_verify_after_apply(mut self, verify: bool) -> Self {
        self.verify_after_apply = verify;
        self
    }

    /// Rotate one credential to completion
    ///
    /// Returns the final attempt on success, or `Ok(None)` when another
    /// worker already owns the rotation. Transient failures retry with
    /// exponential backoff up to the credential's retry budget; permanent
    /// failures abort immediately. Either way the credential is released
    /// back to Active before this returns.
    pub async fn rotate(
        &self,
        id: CredentialId,
        actor: AuditActor,
    ) -> Result<Option<RotationAttempt>, EngineError> {
        let credential = match self.records.begin_rotation(id).await {
            Ok(credential) => credential,
            Err(RecordError::AlreadyRotating { id }) => {
                debug!(credential_id = %id, "rotation already owned elsewhere");
                return Ok(None);
            }
            Err(other) => return Err(other.into()),
        };

        let policy = credential.rotation_policy.clone();
        let mut last_error = String::new();

        for attempt_number in 1..=policy.total_tries() {
            let mut attempt = RotationAttempt::begin(id, attempt_number, Utc::now());
            self.records.put_attempt(attempt.clone()).await?;

            match self.try_once(&credential, &mut attempt).await {
                Ok(new_path) => {
                    let new_version = credential.version + 1;
                    attempt.mark_succeeded(new_version, Utc::now())?;
                    self.records.put_attempt(attempt.clone()).await?;

                    let previous = self
                        .records
                        .commit_rotation(id, new_path, new_version, Utc::now())
                        .await?;
                    self.retire_previous(&credential, &actor, &previous).await;

                    info!(
                        credential_id = %id,
                        version = new_version,
                        attempts = attempt_number,
                        "rotation succeeded"
                    );
                    self.audit(&actor, AuditOperation::Rotate, id, AuditResult::Success, None)
                        .await;
                    return Ok(Some(attempt));
                }
                Err(TryFailure::Permanent(reason)) => {
                    attempt.mark_failed(&reason, Utc::now())?;
                    self.records.put_attempt(attempt).await?;
                    self.records.abort_rotation(id).await?;

                    error!(credential_id = %id, reason = %reason, "rotation failed permanently");
                    self.audit(
                        &actor,
                        AuditOperation::Rotate,
                        id,
                        AuditResult::Failure,
                        Some(reason.clone()),
                    )
                    .await;
                    return Err(RotationError::PermanentApply { reason }.into());
                }
                Err(TryFailure::Transient(reason)) => {
                    attempt.mark_failed(&reason, Utc::now())?;
                    self.records.put_attempt(attempt).await?;
                    last_error = reason;

                    if attempt_number < policy.total_tries() {
                        let delay = policy.backoff_for(attempt_number - 1);
                        warn!(
                            credential_id = %id,
                            attempt = attempt_number,
                            delay_ms = delay.as_millis() as u64,
                            error = %last_error,
                            "transient rotation failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.records.abort_rotation(id).await?;
        let attempts = policy.total_tries();
        error!(
            credential_id = %id,
            attempts,
            error = %last_error,
            "rotation retries exhausted"
        );
        self.audit(
            &actor,
            AuditOperation::Rotate,
            id,
            AuditResult::Failure,
            Some(format!("retries exhausted: {last_error}")),
        )
        .await;
        Err(RotationError::RetriesExhausted {
            attempts,
            last_error,
        }
        .into())
    }

    /// One full try: generate, store, apply, verify
    ///
    /// On failure any stored candidate version is retired best-effort so the
    /// backend does not accumulate orphaned versions.
    async fn try_once(
        &self,
        credential: &Credential,
        attempt: &mut RotationAttempt,
    ) -> Result<VaultPath, TryFailure> {
        let mut step = RotationStep::Idle;
        self.step(&mut step, RotationStep::Generating)?;

        let secret = generate_secret(credential.kind, &self.complexity);
        let hint = format!("{}/{}", credential.owner_ref, credential.kind);
        let new_path = self
            .timed(self.vault.store(&hint, &secret))
            .await
            .map_err(classify_vault)?;
        attempt.new_version = Some(credential.version + 1);

        self.step(&mut step, RotationStep::ExternallyApplying)?;
        let applied = self
            .timed_directory(
                self.directory
                    .apply_secret(&credential.owner_ref, credential.kind, &secret),
            )
            .await;
        if let Err(failure) = applied {
            self.retire_candidate(&new_path).await;
            return Err(failure);
        }

        if self.verify_after_apply {
            self.step(&mut step, RotationStep::Verifying)?;
            if let Err(failure) = self.verify(&new_path, &secret).await {
                self.retire_candidate(&new_path).await;
                return Err(failure);
            }
        }

        self.step(&mut step, RotationStep::Committing)?;
        Ok(new_path)
    }

    /// Fetch the stored candidate back and compare in constant time
    async fn verify(&self, path: &VaultPath, expected: &SecretString) -> Result<(), TryFailure> {
        let stored = self
            .timed(self.vault.fetch(path))
            .await
            .map_err(classify_vault)?;
        if stored == *expected {
            Ok(())
        } else {
            Err(TryFailure::Transient(
                "verification read back a different secret".to_string(),
            ))
        }
    }

    fn step(&self, step: &mut RotationStep, next: RotationStep) -> Result<(), TryFailure> {
        step.transition_to(next)
            .map_err(|e| TryFailure::Permanent(e.to_string()))
    }

    async fn timed<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, VaultError>>,
    ) -> Result<T, VaultError> {
        match tokio::time::timeout(self.io_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(VaultError::Unavailable {
                reason: format!("operation timed out after {:?}", self.io_timeout),
            }),
        }
    }

    async fn timed_directory(
        &self,
        fut: impl std::future::Future<Output = Result<(), DirectoryError>>,
    ) -> Result<(), TryFailure> {
        match tokio::time::timeout(self.io_timeout, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(DirectoryError::Transient { reason })) => Err(TryFailure::Transient(reason)),
            Ok(Err(DirectoryError::Permanent { reason })) => Err(TryFailure::Permanent(reason)),
            Err(_) => Err(TryFailure::Transient(format!(
                "directory apply timed out after {:?}",
                self.io_timeout
            ))),
        }
    }

    /// Withdraw a candidate version left behind by a failed try
    async fn retire_candidate(&self, path: &VaultPath) {
        if let Err(e) = self.vault.retire(path).await {
            warn!(vault_path = %path, error = %e, "could not retire orphaned candidate version");
        }
    }

    /// Retire the pre-rotation version after a successful commit
    async fn retire_previous(
        &self,
        credential: &Credential,
        actor: &AuditActor,
        previous: &VaultPath,
    ) {
        match self.timed(self.vault.retire(previous)).await {
            Ok(()) => {
                self.audit(
                    actor,
                    AuditOperation::Retire,
                    credential.id,
                    AuditResult::Success,
                    Some(format!("previous version at {previous}")),
                )
                .await;
            }
            Err(e) => {
                // The rotation already committed; the stale version is a
                // cleanup item, not a rotation failure.
                warn!(
                    credential_id = %credential.id,
                    vault_path = %previous,
                    error = %e,
                    "previous version could not be retired"
                );
                self.audit(
                    actor,
                    AuditOperation::Retire,
                    credential.id,
                    AuditResult::Failure,
                    Some(e.to_string()),
                )
                .await;
            }
        }
    }

    async fn audit(
        &self,
        actor: &AuditActor,
        operation: AuditOperation,
        id: CredentialId,
        result: AuditResult,
        detail: Option<String>,
    ) {
        let entry = AuditEntry::new(actor.clone(), operation, id, result, detail);
        if let Err(e) = self.audit.append(entry).await {
            error!(credential_id = %id, error = %e, "audit append failed");
        }
    }
}

fn classify_vault(err: VaultError) -> TryFailure {
    if err.is_transient() {
        TryFailure::Transient(err.to_string())
    } else {
        TryFailure::Permanent(err.to_string())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("io_timeout", &self.io_timeout)
            .field("verify_after_apply", &self.verify_after_apply)
            .finish_non_exhaustive()
    }
}
