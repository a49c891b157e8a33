//! Engine configuration
//!
//! Deserializable from TOML/JSON via serde; durations accept humantime
//! strings ("10s", "5m"). The master key is never embedded in config files,
//! only a pointer to where it lives.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::cipher::MasterKey;
use crate::core::RotationPolicy;

/// Configuration validation and loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field is absent or empty
    #[error("missing configuration field '{field}'")]
    MissingField {
        /// Field path
        field: &'static str,
    },

    /// A field has a nonsensical value
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Field path
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// The master key could not be loaded from its source
    #[error("cannot load master key: {reason}")]
    MasterKey {
        /// Why loading failed
        reason: String,
    },
}

/// Which storage backend to run against
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum BackendConfig {
    /// Encrypted files on local disk
    File {
        /// Root directory for secret versions
        base_dir: PathBuf,
    },
    /// In-process map; data does not survive a restart
    Memory,
    /// Azure Key Vault over REST
    AzureKeyVault {
        /// Vault base URL
        vault_url: Url,
        /// REST API version override
        #[serde(default)]
        api_version: Option<String>,
        /// Bearer token for the vault resource
        access_token: String,
    },
    /// Versioned KV v2 HTTP API
    Kv2 {
        /// Server base address
        addr: Url,
        /// KV v2 mount point override
        #[serde(default)]
        mount: Option<String>,
        /// Client token
        token: String,
    },
}

impl BackendConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::File { base_dir } => {
                if base_dir.as_os_str().is_empty() {
                    return Err(ConfigError::MissingField {
                        field: "backend.base_dir",
                    });
                }
            }
            Self::Memory => {}
            Self::AzureKeyVault { access_token, .. } => {
                if access_token.is_empty() {
                    return Err(ConfigError::MissingField {
                        field: "backend.access_token",
                    });
                }
            }
            Self::Kv2 { token, .. } => {
                if token.is_empty() {
                    return Err(ConfigError::MissingField {
                        field: "backend.token",
                    });
                }
            }
        }
        Ok(())
    }
}

/// Where the 32-byte master key comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source", content = "value")]
pub enum MasterKeySource {
    /// Base64-encoded key inline (tests and dev only)
    Base64(String),
    /// File containing the base64-encoded key
    File(PathBuf),
    /// Environment variable containing the base64-encoded key
    Env(String),
}

impl MasterKeySource {
    /// Resolve the source to key material
    pub fn load(&self) -> Result<MasterKey, ConfigError> {
        let encoded = match self {
            Self::Base64(encoded) => encoded.clone(),
            Self::File(path) => {
                std::fs::read_to_string(path).map_err(|e| ConfigError::MasterKey {
                    reason: format!("cannot read {}: {e}", path.display()),
                })?
            }
            Self::Env(var) => std::env::var(var).map_err(|_| ConfigError::MasterKey {
                reason: format!("environment variable '{var}' is not set"),
            })?,
        };
        MasterKey::from_base64(encoded.trim()).map_err(|e| ConfigError::MasterKey {
            reason: e.to_string(),
        })
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Storage backend selection
    pub backend: BackendConfig,

    /// Master key location
    pub master_key: MasterKeySource,

    /// Policy applied to credentials created without an explicit one
    #[serde(default)]
    pub default_policy: RotationPolicy,

    /// Concurrent rotations per sweep
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Timeout for any single vault or directory call
    #[serde(default = "default_io_timeout", with = "humantime_serde")]
    pub io_timeout: Duration,

    /// Read the stored secret back and compare before committing
    #[serde(default = "default_verify_after_apply")]
    pub verify_after_apply: bool,

    /// Credentials fetched per due-page query
    #[serde(default = "default_due_page_size")]
    pub due_page_size: usize,
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_io_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_verify_after_apply() -> bool {
    true
}

fn default_due_page_size() -> usize {
    64
}

impl EngineConfig {
    /// Minimal config against the in-memory backend
    pub fn in_memory(master_key: MasterKeySource) -> Self {
        Self {
            backend: BackendConfig::Memory,
            master_key,
            default_policy: RotationPolicy::default(),
            worker_pool_size: default_worker_pool_size(),
            io_timeout: default_io_timeout(),
            verify_after_apply: default_verify_after_apply(),
            due_page_size: default_due_page_size(),
        }
    }

    /// Reject nonsensical configurations before the engine starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend.validate()?;
        if self.worker_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker_pool_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.io_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "io_timeout",
                reason: "must be positive".to_string(),
            });
        }
        if self.due_page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "due_page_size",
                reason: "must be at least 1".to_string(),
            });
        }
        self.default_policy
            .validate()
            .map_err(|e| ConfigError::InvalidValue {
                field: "default_policy",
                reason: e.to_string(),
            })
    }
}
