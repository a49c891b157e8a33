//! Storage backend adapters
//!
//! One uniform contract ([`SecretBackend`]) implemented per physical backend.
//! Adapters move opaque ciphertext blobs; sealing and opening happen in the
//! vault facade so encryption-at-rest applies to every backend uniformly.

pub mod azure;
pub mod file;
pub mod kv2;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{VaultError, VaultPath};

pub use azure::{AzureKeyVaultBackend, AzureKeyVaultConfig};
pub use file::{FileBackend, FileBackendConfig};
pub use kv2::{Kv2Backend, Kv2Config};
pub use memory::MemoryBackend;

/// Which physical backend the facade is wired to; diagnostics only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Encrypted local file store
    File,
    /// In-memory store for tests and embedders
    Memory,
    /// Azure Key Vault-shaped versioned secret service
    AzureKeyVault,
    /// KV-v2-shaped enterprise secret-management service
    Kv2,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::File => "file",
            Self::Memory => "memory",
            Self::AzureKeyVault => "azure_key_vault",
            Self::Kv2 => "kv2",
        };
        f.write_str(s)
    }
}

/// Uniform contract over one physical secret store
///
/// Every entry is one immutable version: `store` never overwrites, `retire`
/// soft-deletes (a retired version leaves normal `fetch` but survives a grace
/// period for rollback), and retiring twice is not an error.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Write a new immutable version under `path_hint`, returning its locator
    async fn store(&self, path_hint: &str, blob: &[u8]) -> Result<VaultPath, VaultError>;

    /// Read one version's blob; retired versions are `NotFound`
    async fn fetch(&self, path: &VaultPath) -> Result<Vec<u8>, VaultError>;

    /// Soft-delete one version; idempotent
    async fn retire(&self, path: &VaultPath) -> Result<(), VaultError>;

    /// All non-retired versions currently stored under `path_hint`
    async fn list_versions(&self, path_hint: &str) -> Result<Vec<VaultPath>, VaultError>;

    /// Cheap liveness probe
    async fn healthcheck(&self) -> Result<(), VaultError>;
}

/// Normalize a caller-supplied path hint into a safe backend key segment
///
/// Keeps `[a-zA-Z0-9._-]` and path separators; everything else becomes `-`.
/// Rejects traversal segments outright.
pub(crate) fn sanitize_hint(hint: &str) -> String {
    hint.split('/')
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .map(|segment| {
            segment
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                        c
                    } else {
                        '-'
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_safe_segments() {
        assert_eq!(sanitize_hint("svc-app/password"), "svc-app/password");
        assert_eq!(sanitize_hint("a b/c:d"), "a-b/c-d");
    }

    #[test]
    fn sanitize_strips_traversal() {
        assert_eq!(sanitize_hint("../etc/passwd"), "etc/passwd");
        assert_eq!(sanitize_hint("a/./b//c"), "a/b/c");
    }
}
