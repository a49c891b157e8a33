//! KV version-2 secret backend
//!
//! Targets the versioned key/value HTTP API exposed by enterprise secret
//! managers. Every write to a logical path creates a new numbered version,
//! so vault paths here are `<path>#<version>`. Retirement soft-deletes the
//! single version, leaving the rest of the history intact.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::core::{VaultError, VaultPath};

use super::{sanitize_hint, SecretBackend};

const DEFAULT_MOUNT: &str = "secret";
const BLOB_FIELD: &str = "blob";

/// Configuration for the KV v2 backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kv2Config {
    /// Server base address, e.g. `https://secrets.internal:8200`
    pub addr: Url,
    /// KV v2 mount point
    #[serde(default = "default_mount")]
    pub mount: String,
    /// Client token
    pub token: String,
}

fn default_mount() -> String {
    DEFAULT_MOUNT.to_string()
}

/// KV v2 backed [`SecretBackend`]
#[derive(Debug, Clone)]
pub struct Kv2Backend {
    client: reqwest::Client,
    config: Kv2Config,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    data: WriteMetadata,
}

#[derive(Debug, Deserialize)]
struct WriteMetadata {
    version: u64,
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    data: ReadEnvelope,
}

#[derive(Debug, Deserialize)]
struct ReadEnvelope {
    #[serde(default)]
    data: Option<serde_json::Map<String, serde_json::Value>>,
    metadata: ReadMetadata,
}

#[derive(Debug, Deserialize)]
struct ReadMetadata {
    #[serde(default)]
    deletion_time: String,
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    data: MetadataBody,
}

#[derive(Debug, Deserialize)]
struct MetadataBody {
    #[serde(default)]
    versions: serde_json::Map<String, serde_json::Value>,
}

impl Kv2Backend {
    pub fn new(config: Kv2Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, route: &str, path: &str) -> Result<Url, VaultError> {
        self.config
            .addr
            .join(&format!("v1/{}/{route}/{path}", self.config.mount))
            .map_err(|e| VaultError::Unavailable {
                reason: format!("invalid server address: {e}"),
            })
    }

    fn split_path(path: &VaultPath) -> Result<(&str, u64), VaultError> {
        let not_found = || VaultError::NotFound {
            path: path.as_str().to_string(),
        };
        let (logical, version) = path.as_str().rsplit_once('#').ok_or_else(not_found)?;
        let version = version.parse().map_err(|_| not_found())?;
        Ok((logical, version))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, VaultError> {
        request
            .header("X-Vault-Token", &self.config.token)
            .send()
            .await
            .map_err(|e| VaultError::Unavailable {
                reason: format!("kv request failed: {e}"),
            })
    }

    fn status_error(path: &str, status: StatusCode) -> VaultError {
        if status == StatusCode::NOT_FOUND {
            VaultError::NotFound {
                path: path.to_string(),
            }
        } else {
            VaultError::Unavailable {
                reason: format!("kv server returned {status}"),
            }
        }
    }
}

#[async_trait]
impl SecretBackend for Kv2Backend {
    async fn store(&self, path_hint: &str, blob: &[u8]) -> Result<VaultPath, VaultError> {
        let logical = sanitize_hint(path_hint);
        let url = self.url("data", &logical)?;
        let body = json!({ "data": { BLOB_FIELD: BASE64.encode(blob) } });

        let response = self.send(self.client.post(url).json(&body)).await?;
        if !response.status().is_success() {
            return Err(Self::status_error(&logical, response.status()));
        }

        let written: WriteResponse =
            response.json().await.map_err(|e| VaultError::Unavailable {
                reason: format!("malformed kv response: {e}"),
            })?;
        Ok(VaultPath::new(format!("{logical}#{}", written.data.version)))
    }

    async fn fetch(&self, path: &VaultPath) -> Result<Vec<u8>, VaultError> {
        let (logical, version) = Self::split_path(path)?;
        let mut url = self.url("data", logical)?;
        url.query_pairs_mut()
            .append_pair("version", &version.to_string());

        let response = self.send(self.client.get(url)).await?;
        if !response.status().is_success() {
            return Err(Self::status_error(path.as_str(), response.status()));
        }

        let read: ReadResponse = response.json().await.map_err(|e| VaultError::Unavailable {
            reason: format!("malformed kv response: {e}"),
        })?;

        // Soft-deleted versions come back with a deletion timestamp and no
        // data payload.
        if !read.data.metadata.deletion_time.is_empty() {
            return Err(VaultError::NotFound {
                path: path.as_str().to_string(),
            });
        }
        let encoded = read
            .data
            .data
            .as_ref()
            .and_then(|fields| fields.get(BLOB_FIELD))
            .and_then(|v| v.as_str())
            .ok_or_else(|| VaultError::NotFound {
                path: path.as_str().to_string(),
            })?;
        BASE64.decode(encoded).map_err(|e| VaultError::Unavailable {
            reason: format!("secret value is not valid base64: {e}"),
        })
    }

    async fn retire(&self, path: &VaultPath) -> Result<(), VaultError> {
        let (logical, version) = Self::split_path(path)?;
        let url = self.url("delete", logical)?;
        let body = json!({ "versions": [version] });

        let response = self.send(self.client.post(url).json(&body)).await?;
        match response.status() {
            // Soft-deleting an already-deleted version is a no-op upstream.
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(VaultError::NotFound {
                path: path.as_str().to_string(),
            }),
            status => Err(Self::status_error(path.as_str(), status)),
        }
    }

    async fn list_versions(&self, path_hint: &str) -> Result<Vec<VaultPath>, VaultError> {
        let logical = sanitize_hint(path_hint);
        let url = self.url("metadata", &logical)?;

        let response = self.send(self.client.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(Self::status_error(&logical, response.status()));
        }

        let metadata: MetadataResponse =
            response.json().await.map_err(|e| VaultError::Unavailable {
                reason: format!("malformed kv response: {e}"),
            })?;

        let mut versions: Vec<u64> = Vec::new();
        for (version, info) in &metadata.data.versions {
            let deleted = info
                .get("deletion_time")
                .and_then(|v| v.as_str())
                .is_some_and(|t| !t.is_empty());
            let destroyed = info
                .get("destroyed")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if !deleted && !destroyed {
                if let Ok(n) = version.parse() {
                    versions.push(n);
                }
            }
        }
        versions.sort_unstable();
        Ok(versions
            .into_iter()
            .map(|n| VaultPath::new(format!("{logical}#{n}")))
            .collect())
    }

    async fn healthcheck(&self) -> Result<(), VaultError> {
        let url = self
            .config
            .addr
            .join("v1/sys/health")
            .map_err(|e| VaultError::Unavailable {
                reason: format!("invalid server address: {e}"),
            })?;

        let response = self.send(self.client.get(url)).await?;
        // Standby nodes answer 429 and are still able to proxy requests.
        if response.status().is_success() || response.status() == StatusCode::TOO_MANY_REQUESTS {
            Ok(())
        } else {
            Err(VaultError::Unavailable {
                reason: format!("kv healthcheck returned {}", response.status()),
            })
        }
    }
}
