//! Encrypted local file store
//!
//! Each version is one file whose name is derived from the SHA-256 of its
//! ciphertext, so `store` is naturally write-once: the same content maps to
//! the same path, and a colliding path with different content cannot occur.
//! Retirement moves the file into a `retired/` subdirectory instead of
//! deleting it, which keeps rollback possible while a rotation settles.

use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::core::{VaultError, VaultPath};

use super::{sanitize_hint, SecretBackend};

const BLOB_EXT: &str = "blob";
const RETIRED_DIR: &str = "retired";

/// Configuration for the file backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBackendConfig {
    /// Root directory for all versions; created if missing
    pub base_dir: PathBuf,
}

impl FileBackendConfig {
    /// Configuration rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

/// File-based [`SecretBackend`]
#[derive(Debug, Clone)]
pub struct FileBackend {
    base_dir: PathBuf,
}

impl FileBackend {
    /// Build a backend from config
    pub fn new(config: FileBackendConfig) -> Self {
        Self {
            base_dir: config.base_dir,
        }
    }

    fn active_file(&self, path: &VaultPath) -> PathBuf {
        let mut file = self.base_dir.join(path.as_str());
        file.set_extension(BLOB_EXT);
        file
    }

    fn retired_file(&self, path: &VaultPath) -> PathBuf {
        let raw = path.as_str();
        let (dir, name) = match raw.rsplit_once('/') {
            Some((dir, name)) => (self.base_dir.join(dir), name),
            None => (self.base_dir.clone(), raw),
        };
        dir.join(RETIRED_DIR).join(format!("{name}.{BLOB_EXT}"))
    }

    async fn ensure_dir(&self, dir: &Path) -> Result<(), VaultError> {
        tokio::fs::create_dir_all(dir).await.map_err(io_unavailable)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            tokio::fs::set_permissions(dir, perms)
                .await
                .map_err(io_unavailable)?;
        }
        Ok(())
    }
}

fn io_unavailable(err: std::io::Error) -> VaultError {
    VaultError::Unavailable {
        reason: err.to_string(),
    }
}

/// Write `data` to `target` via a temp file in the same directory, then rename
async fn atomic_write(target: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut suffix = [0u8; 8];
    rand::rng().fill_bytes(&mut suffix);
    let tmp = target.with_extension(format!("tmp-{}", hex(&suffix)));

    tokio::fs::write(&tmp, data).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp, perms).await?;
    }
    tokio::fs::rename(&tmp, target).await
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl SecretBackend for FileBackend {
    async fn store(&self, path_hint: &str, blob: &[u8]) -> Result<VaultPath, VaultError> {
        let hint = sanitize_hint(path_hint);
        let digest = hex(&Sha256::digest(blob));
        let path = VaultPath::new(format!("{hint}/{digest}"));

        // A retired twin means this exact version was already used and
        // withdrawn; resurrecting it would violate write-once semantics.
        let retired = self.retired_file(&path);
        if tokio::fs::try_exists(&retired).await.map_err(io_unavailable)? {
            return Err(VaultError::AlreadyExists {
                path: path.as_str().to_string(),
            });
        }

        let file = self.active_file(&path);
        if tokio::fs::try_exists(&file).await.map_err(io_unavailable)? {
            // Content-addressed: an existing active file is byte-identical.
            return Ok(path);
        }

        if let Some(parent) = file.parent() {
            self.ensure_dir(parent).await?;
        }
        atomic_write(&file, blob).await.map_err(io_unavailable)?;
        Ok(path)
    }

    async fn fetch(&self, path: &VaultPath) -> Result<Vec<u8>, VaultError> {
        match tokio::fs::read(self.active_file(path)).await {
            Ok(blob) => Ok(blob),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(VaultError::NotFound {
                path: path.as_str().to_string(),
            }),
            Err(err) => Err(io_unavailable(err)),
        }
    }

    async fn retire(&self, path: &VaultPath) -> Result<(), VaultError> {
        let active = self.active_file(path);
        let retired = self.retired_file(path);

        let active_exists = tokio::fs::try_exists(&active).await.map_err(io_unavailable)?;
        if !active_exists {
            // Idempotent when the version was already retired.
            if tokio::fs::try_exists(&retired).await.map_err(io_unavailable)? {
                return Ok(());
            }
            return Err(VaultError::NotFound {
                path: path.as_str().to_string(),
            });
        }

        if let Some(parent) = retired.parent() {
            self.ensure_dir(parent).await?;
        }
        tokio::fs::rename(&active, &retired)
            .await
            .map_err(io_unavailable)
    }

    async fn list_versions(&self, path_hint: &str) -> Result<Vec<VaultPath>, VaultError> {
        let hint = sanitize_hint(path_hint);
        let dir = self.base_dir.join(&hint);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_unavailable(err)),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_unavailable)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(BLOB_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    versions.push(VaultPath::new(format!("{hint}/{stem}")));
                }
            }
        }
        versions.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(versions)
    }

    async fn healthcheck(&self) -> Result<(), VaultError> {
        let base = self.base_dir.clone();
        self.ensure_dir(&base).await
    }
}
