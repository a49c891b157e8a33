//! Top-level engine facade
//!
//! Wires the vault, record manager, orchestrator, scheduler, and audit trail
//! together from an [`EngineConfig`]. Library consumers interact with this
//! type; the lower layers stay reachable for tests and embedders that need
//! finer control.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::audit::{
    AuditActor, AuditEntry, AuditOperation, AuditResult, AuditSink, MemoryAuditSink,
};
use crate::backend::{
    AzureKeyVaultBackend, AzureKeyVaultConfig, BackendKind, FileBackend, FileBackendConfig,
    Kv2Backend, Kv2Config, MemoryBackend,
};
use crate::config::{BackendConfig, EngineConfig};
use crate::core::{
    Credential, CredentialId, CredentialKind, EngineError, EngineResult, RotationAttempt,
    RotationPolicy, SecretString,
};
use crate::directory::DirectoryService;
use crate::record::{MemoryRecordStore, RecordManager, RecordStore};
use crate::rotation::{generate_secret, ComplexityProfile, Orchestrator};
use crate::scheduler::{Scheduler, SweepReport};
use crate::vault::{Backend, Vault};

/// Builder for [`RotationEngine`]
///
/// The directory service is the one collaborator with no default; everything
/// else falls back to in-memory implementations suitable for tests.
pub struct RotationEngineBuilder {
    config: EngineConfig,
    directory: Option<Arc<dyn DirectoryService>>,
    store: Option<Arc<dyn RecordStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    backend: Option<Backend>,
    complexity: ComplexityProfile,
}

impl RotationEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            directory: None,
            store: None,
            audit: None,
            backend: None,
            complexity: ComplexityProfile::default(),
        }
    }

    /// Set the directory service rotated secrets are pushed to (required)
    pub fn directory(mut self, directory: Arc<dyn DirectoryService>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Override the record store (defaults to in-memory)
    pub fn record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the audit sink (defaults to in-memory)
    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Override the secret backend, ignoring the configured one
    ///
    /// Embedders and tests use this to hand the engine a backend they keep a
    /// handle to.
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Password complexity for generated secrets
    pub fn complexity(mut self, complexity: ComplexityProfile) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn build(self) -> EngineResult<RotationEngine> {
        self.config.validate()?;
        let directory = self.directory.ok_or(EngineError::Config(
            crate::config::ConfigError::MissingField {
                field: "directory service",
            },
        ))?;

        let key = self.config.master_key.load()?;
        let backend = match self.backend {
            Some(backend) => backend,
            None => Self::backend_from_config(&self.config.backend),
        };
        let vault = Arc::new(Vault::new(backend, key));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryRecordStore::new()));
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(MemoryAuditSink::new()));
        let records = RecordManager::new(store);

        let orchestrator = Arc::new(
            Orchestrator::new(
                Arc::clone(&vault),
                records.clone(),
                directory,
                Arc::clone(&audit),
            )
            .with_complexity(self.complexity.clone())
            .with_io_timeout(self.config.io_timeout)
            .with_verify_after_apply(self.config.verify_after_apply),
        );
        let scheduler = Scheduler::new(
            Arc::clone(&orchestrator),
            records.clone(),
            self.config.worker_pool_size,
        )
        .with_page_size(self.config.due_page_size);

        info!(backend = %vault.selected_backend_kind(), "rotation engine assembled");
        Ok(RotationEngine {
            vault,
            records,
            orchestrator,
            scheduler,
            audit,
            default_policy: self.config.default_policy,
            complexity: self.complexity,
        })
    }

    fn backend_from_config(config: &BackendConfig) -> Backend {
        match config {
            BackendConfig::File { base_dir } => {
                Backend::File(FileBackend::new(FileBackendConfig::new(base_dir.clone())))
            }
            BackendConfig::Memory => Backend::Memory(Arc::new(MemoryBackend::new())),
            BackendConfig::AzureKeyVault {
                vault_url,
                api_version,
                access_token,
            } => Backend::AzureKeyVault(AzureKeyVaultBackend::new(AzureKeyVaultConfig {
                vault_url: vault_url.clone(),
                api_version: api_version.clone().unwrap_or_else(|| "7.4".to_string()),
                access_token: access_token.clone(),
            })),
            BackendConfig::Kv2 { addr, mount, token } => Backend::Kv2(Kv2Backend::new(Kv2Config {
                addr: addr.clone(),
                mount: mount.clone().unwrap_or_else(|| "secret".to_string()),
                token: token.clone(),
            })),
        }
    }
}

/// The credential vault and rotation engine
pub struct RotationEngine {
    vault: Arc<Vault>,
    records: RecordManager,
    orchestrator: Arc<Orchestrator>,
    scheduler: Scheduler,
    audit: Arc<dyn AuditSink>,
    default_policy: RotationPolicy,
    complexity: ComplexityProfile,
}

impl RotationEngine {
    pub fn builder(config: EngineConfig) -> RotationEngineBuilder {
        RotationEngineBuilder::new(config)
    }

    pub fn selected_backend_kind(&self) -> BackendKind {
        self.vault.selected_backend_kind()
    }

    /// Bring a new credential under management
    ///
    /// Generates an initial secret, seals it into the vault, and registers
    /// the record at version 1. The plaintext is discarded after storage;
    /// callers fetch it back through [`fetch_current`](Self::fetch_current).
    pub async fn create_credential(
        &self,
        owner_ref: impl Into<String>,
        kind: CredentialKind,
        policy: Option<RotationPolicy>,
        actor: AuditActor,
    ) -> EngineResult<Credential> {
        let owner_ref = owner_ref.into();
        let policy = policy.unwrap_or_else(|| self.default_policy.clone());

        let secret = generate_secret(kind, &self.complexity);
        let hint = format!("{owner_ref}/{kind}");
        let path = self.vault.store(&hint, &secret).await?;
        let credential = self
            .records
            .create(owner_ref, kind, policy, path, Utc::now())
            .await?;

        self.append_audit(
            actor,
            AuditOperation::Store,
            credential.id,
            AuditResult::Success,
            Some(format!("registered {kind} credential at version 1")),
        )
        .await;
        Ok(credential)
    }

    /// Rotate one credential immediately
    ///
    /// `Ok(None)` means another worker already owns the rotation.
    pub async fn rotate_now(
        &self,
        id: CredentialId,
        actor: AuditActor,
    ) -> EngineResult<Option<RotationAttempt>> {
        self.orchestrator.rotate(id, actor).await
    }

    /// Fetch the current plaintext for a credential
    pub async fn fetch_current(
        &self,
        id: CredentialId,
        actor: AuditActor,
    ) -> EngineResult<SecretString> {
        let credential = match self.records.get(id).await {
            Ok(credential) => credential,
            Err(e) => {
                self.append_audit(
                    actor,
                    AuditOperation::Fetch,
                    id,
                    AuditResult::Failure,
                    Some(e.to_string()),
                )
                .await;
                return Err(e.into());
            }
        };

        match self.vault.fetch(&credential.vault_path).await {
            Ok(secret) => {
                // Audit before usage tracking so a tracking hiccup cannot
                // leave a served secret off the trail.
                self.append_audit(actor, AuditOperation::Fetch, id, AuditResult::Success, None)
                    .await;
                if let Err(e) = self.records.record_fetch(id, Utc::now()).await {
                    tracing::warn!(
                        credential_id = %id,
                        error = %e,
                        "could not record fetch usage"
                    );
                }
                Ok(secret)
            }
            Err(e) => {
                self.append_audit(
                    actor,
                    AuditOperation::Fetch,
                    id,
                    AuditResult::Failure,
                    Some(e.to_string()),
                )
                .await;
                Err(e.into())
            }
        }
    }

    /// Look up a credential record (no secret material)
    pub async fn get_credential(&self, id: CredentialId) -> EngineResult<Credential> {
        Ok(self.records.get(id).await?)
    }

    /// Rotation attempt history for a credential, oldest first
    pub async fn attempt_history(&self, id: CredentialId) -> EngineResult<Vec<RotationAttempt>> {
        Ok(self.records.attempts_for(id).await?)
    }

    /// Decommission a credential and retire its current secret version
    pub async fn retire_credential(
        &self,
        id: CredentialId,
        actor: AuditActor,
    ) -> EngineResult<Credential> {
        let credential = self.records.retire(id).await?;
        // Best effort: the record is authoritative even if the backend
        // cannot withdraw the version right now.
        match self.vault.retire(&credential.vault_path).await {
            Ok(()) => {
                self.append_audit(actor, AuditOperation::Retire, id, AuditResult::Success, None)
                    .await;
            }
            Err(e) => {
                tracing::warn!(
                    credential_id = %id,
                    error = %e,
                    "could not retire vault version during decommission"
                );
                self.append_audit(
                    actor,
                    AuditOperation::Retire,
                    id,
                    AuditResult::Failure,
                    Some(e.to_string()),
                )
                .await;
            }
        }
        Ok(credential)
    }

    /// Set or clear the hard expiry on a credential
    pub async fn set_expiry(
        &self,
        id: CredentialId,
        expires_at: Option<DateTime<Utc>>,
    ) -> EngineResult<Credential> {
        Ok(self.records.set_expiry(id, expires_at).await?)
    }

    /// Rotate everything due at `as_of` over the worker pool
    pub async fn run_due_rotations(&self, as_of: DateTime<Utc>) -> EngineResult<SweepReport> {
        Ok(self.scheduler.run_due_rotations(as_of).await?)
    }

    /// Close out rotations orphaned by a previous process
    ///
    /// Call once at startup before the first sweep.
    pub async fn recover_abandoned(&self) -> EngineResult<Vec<CredentialId>> {
        let recovered = self.records.recover_abandoned(Utc::now()).await?;
        for id in &recovered {
            self.append_audit(
                AuditActor::Scheduler,
                AuditOperation::Recover,
                *id,
                AuditResult::Success,
                Some("abandoned rotation reverted to previous version".to_string()),
            )
            .await;
        }
        Ok(recovered)
    }

    /// The scheduler, for embedders running their own periodic loop
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    async fn append_audit(
        &self,
        actor: AuditActor,
        operation: AuditOperation,
        id: CredentialId,
        result: AuditResult,
        detail: Option<String>,
    ) {
        let entry = AuditEntry::new(actor, operation, id, result, detail);
        if let Err(e) = self.audit.append(entry).await {
            tracing::error!(credential_id = %id, error = %e, "audit append failed");
        }
    }
}

impl std::fmt::Debug for RotationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationEngine")
            .field("backend", &self.selected_backend_kind())
            .finish_non_exhaustive()
    }
}
