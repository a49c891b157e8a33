//! Encrypting vault facade
//!
//! Every secret passes through the sealed-blob cipher before it reaches a
//! backend, so backends only ever see ciphertext and a plaintext secret never
//! leaves process memory unencrypted.

use std::sync::Arc;

use tracing::debug;

use crate::backend::{
    AzureKeyVaultBackend, BackendKind, FileBackend, Kv2Backend, MemoryBackend, SecretBackend,
};
use crate::cipher::{self, MasterKey};
use crate::core::{CipherError, SecretString, VaultError, VaultPath};

/// The configured storage backend
pub enum Backend {
    File(FileBackend),
    Memory(Arc<MemoryBackend>),
    AzureKeyVault(AzureKeyVaultBackend),
    Kv2(Kv2Backend),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::File(_) => BackendKind::File,
            Backend::Memory(_) => BackendKind::Memory,
            Backend::AzureKeyVault(_) => BackendKind::AzureKeyVault,
            Backend::Kv2(_) => BackendKind::Kv2,
        }
    }

    fn as_backend(&self) -> &dyn SecretBackend {
        match self {
            Backend::File(backend) => backend,
            Backend::Memory(backend) => backend.as_ref(),
            Backend::AzureKeyVault(backend) => backend,
            Backend::Kv2(backend) => backend,
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Backend").field(&self.kind()).finish()
    }
}

/// Secret storage with envelope encryption in front of a [`SecretBackend`]
pub struct Vault {
    backend: Backend,
    key: MasterKey,
}

impl Vault {
    pub fn new(backend: Backend, key: MasterKey) -> Self {
        Self { backend, key }
    }

    /// Which adapter this facade was configured with
    pub fn selected_backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Seal `secret` and persist it under a fresh version for `path_hint`
    pub async fn store(
        &self,
        path_hint: &str,
        secret: &SecretString,
    ) -> Result<VaultPath, VaultError> {
        let blob = secret.expose_bytes(|bytes| cipher::seal(&self.key, bytes))?;
        let path = self.backend.as_backend().store(path_hint, &blob).await?;
        debug!(backend = %self.backend.kind(), vault_path = %path, "stored secret version");
        Ok(path)
    }

    /// Fetch and open the version at `path`
    pub async fn fetch(&self, path: &VaultPath) -> Result<SecretString, VaultError> {
        let blob = self.backend.as_backend().fetch(path).await?;
        let plaintext = cipher::open(&self.key, &blob)?;
        let value = String::from_utf8(plaintext).map_err(|_| CipherError::MalformedBlob)?;
        Ok(SecretString::from(value))
    }

    /// Withdraw the version at `path` from normal fetch
    pub async fn retire(&self, path: &VaultPath) -> Result<(), VaultError> {
        self.backend.as_backend().retire(path).await?;
        debug!(backend = %self.backend.kind(), vault_path = %path, "retired secret version");
        Ok(())
    }

    pub async fn list_versions(&self, path_hint: &str) -> Result<Vec<VaultPath>, VaultError> {
        self.backend.as_backend().list_versions(path_hint).await
    }

    pub async fn healthcheck(&self) -> Result<(), VaultError> {
        self.backend.as_backend().healthcheck().await
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("backend", &self.backend.kind())
            .finish_non_exhaustive()
    }
}
