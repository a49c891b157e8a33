//! In-memory secret backend
//!
//! Mirrors the file backend's content-addressed, write-once layout without
//! touching disk. Supports targeted fault injection so orchestrator tests can
//! exercise transient-failure paths deterministically.

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::core::{VaultError, VaultPath};

use super::{sanitize_hint, SecretBackend};

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Vec<u8>,
    retired: bool,
}

/// Map-backed [`SecretBackend`] for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct MemoryBackend {
    blobs: DashMap<String, StoredBlob>,
    fail_store: AtomicU32,
    fail_fetch: AtomicU32,
    fail_retire: AtomicU32,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` store calls fail with [`VaultError::Unavailable`]
    pub fn fail_next_stores(&self, n: u32) {
        self.fail_store.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` fetch calls fail with [`VaultError::Unavailable`]
    pub fn fail_next_fetches(&self, n: u32) {
        self.fail_fetch.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` retire calls fail with [`VaultError::Unavailable`]
    pub fn fail_next_retires(&self, n: u32) {
        self.fail_retire.store(n, Ordering::SeqCst);
    }

    /// Number of versions held, retired included
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn injected() -> VaultError {
        VaultError::Unavailable {
            reason: "injected fault".to_string(),
        }
    }
}

#[async_trait]
impl SecretBackend for MemoryBackend {
    async fn store(&self, path_hint: &str, blob: &[u8]) -> Result<VaultPath, VaultError> {
        if Self::take_fault(&self.fail_store) {
            return Err(Self::injected());
        }

        let hint = sanitize_hint(path_hint);
        let digest: String = Sha256::digest(blob)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        let path = VaultPath::new(format!("{hint}/{digest}"));

        match self.blobs.entry(path.as_str().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                if entry.get().retired {
                    return Err(VaultError::AlreadyExists {
                        path: path.as_str().to_string(),
                    });
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(StoredBlob {
                    data: blob.to_vec(),
                    retired: false,
                });
            }
        }
        Ok(path)
    }

    async fn fetch(&self, path: &VaultPath) -> Result<Vec<u8>, VaultError> {
        if Self::take_fault(&self.fail_fetch) {
            return Err(Self::injected());
        }

        match self.blobs.get(path.as_str()) {
            Some(entry) if !entry.retired => Ok(entry.data.clone()),
            _ => Err(VaultError::NotFound {
                path: path.as_str().to_string(),
            }),
        }
    }

    async fn retire(&self, path: &VaultPath) -> Result<(), VaultError> {
        if Self::take_fault(&self.fail_retire) {
            return Err(Self::injected());
        }

        match self.blobs.get_mut(path.as_str()) {
            Some(mut entry) => {
                entry.retired = true;
                Ok(())
            }
            None => Err(VaultError::NotFound {
                path: path.as_str().to_string(),
            }),
        }
    }

    async fn list_versions(&self, path_hint: &str) -> Result<Vec<VaultPath>, VaultError> {
        let prefix = format!("{}/", sanitize_hint(path_hint));
        let mut versions: Vec<VaultPath> = self
            .blobs
            .iter()
            .filter(|entry| !entry.retired && entry.key().starts_with(&prefix))
            .map(|entry| VaultPath::new(entry.key().clone()))
            .collect();
        versions.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(versions)
    }

    async fn healthcheck(&self) -> Result<(), VaultError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_fetch_retire_cycle() {
        let backend = MemoryBackend::new();
        let path = backend.store("app/secret", b"blob").await.unwrap();
        assert_eq!(backend.fetch(&path).await.unwrap(), b"blob");

        backend.retire(&path).await.unwrap();
        assert!(matches!(
            backend.fetch(&path).await,
            Err(VaultError::NotFound { .. })
        ));
        // Retire stays idempotent.
        backend.retire(&path).await.unwrap();
    }

    #[tokio::test]
    async fn injected_faults_burn_down() {
        let backend = MemoryBackend::new();
        backend.fail_next_stores(2);

        for _ in 0..2 {
            assert!(matches!(
                backend.store("app/secret", b"blob").await,
                Err(VaultError::Unavailable { .. })
            ));
        }
        backend.store("app/secret", b"blob").await.unwrap();
    }

    #[tokio::test]
    async fn list_versions_is_scoped_to_hint() {
        let backend = MemoryBackend::new();
        backend.store("a/pw", b"one").await.unwrap();
        backend.store("a/pw", b"two").await.unwrap();
        backend.store("b/pw", b"three").await.unwrap();

        assert_eq!(backend.list_versions("a/pw").await.unwrap().len(), 2);
        assert_eq!(backend.list_versions("b/pw").await.unwrap().len(), 1);
    }
}
