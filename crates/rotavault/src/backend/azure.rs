//! Azure Key Vault secret backend
//!
//! Talks to the Key Vault REST API over HTTPS. Blobs are base64-encoded into
//! the secret value since Key Vault stores strings. A rotation produces a new
//! secret version, so vault paths carry both the secret name and the version
//! identifier Azure assigns.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::core::{VaultError, VaultPath};

use super::{sanitize_hint, SecretBackend};

const DEFAULT_API_VERSION: &str = "7.4";

/// Configuration for the Azure Key Vault backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureKeyVaultConfig {
    /// Vault base URL, e.g. `https://myvault.vault.azure.net`
    pub vault_url: Url,
    /// REST API version
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// OAuth2 bearer token for the vault resource
    pub access_token: String,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

/// Key Vault backed [`SecretBackend`]
#[derive(Debug, Clone)]
pub struct AzureKeyVaultBackend {
    client: reqwest::Client,
    config: AzureKeyVaultConfig,
}

#[derive(Debug, Deserialize)]
struct SecretBundle {
    id: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecretVersionList {
    #[serde(default)]
    value: Vec<SecretVersionItem>,
}

#[derive(Debug, Deserialize)]
struct SecretVersionItem {
    id: String,
    #[serde(default)]
    attributes: Option<SecretAttributes>,
}

#[derive(Debug, Deserialize)]
struct SecretAttributes {
    #[serde(default)]
    enabled: Option<bool>,
}

impl AzureKeyVaultBackend {
    pub fn new(config: AzureKeyVaultConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, segments: &str) -> Result<Url, VaultError> {
        let mut url = self
            .config
            .vault_url
            .join(segments)
            .map_err(|e| VaultError::Unavailable {
                reason: format!("invalid vault url: {e}"),
            })?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.config.api_version);
        Ok(url)
    }

    /// Key Vault secret names only allow alphanumerics and dashes
    fn secret_name(path_hint: &str) -> String {
        sanitize_hint(path_hint)
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect()
    }

    /// Extract `name/version` from a bundle id like
    /// `https://myvault.vault.azure.net/secrets/<name>/<version>`
    fn path_from_id(id: &str) -> Result<VaultPath, VaultError> {
        let mut tail = id.rsplit('/');
        let version = tail.next();
        let name = tail.next();
        match (name, version) {
            (Some(name), Some(version)) if !name.is_empty() && !version.is_empty() => {
                Ok(VaultPath::new(format!("{name}/{version}")))
            }
            _ => Err(VaultError::Unavailable {
                reason: format!("unparseable secret id: {id}"),
            }),
        }
    }

    fn split_path(path: &VaultPath) -> Result<(&str, &str), VaultError> {
        path.as_str()
            .split_once('/')
            .ok_or_else(|| VaultError::NotFound {
                path: path.as_str().to_string(),
            })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, VaultError> {
        let response = request
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| VaultError::Unavailable {
                reason: format!("key vault request failed: {e}"),
            })?;
        Ok(response)
    }

    fn status_error(path: &str, status: StatusCode) -> VaultError {
        if status == StatusCode::NOT_FOUND {
            VaultError::NotFound {
                path: path.to_string(),
            }
        } else {
            VaultError::Unavailable {
                reason: format!("key vault returned {status}"),
            }
        }
    }
}

#[async_trait]
impl SecretBackend for AzureKeyVaultBackend {
    async fn store(&self, path_hint: &str, blob: &[u8]) -> Result<VaultPath, VaultError> {
        let name = Self::secret_name(path_hint);
        let url = self.url(&format!("secrets/{name}"))?;
        let body = json!({ "value": BASE64.encode(blob) });

        let response = self.send(self.client.put(url).json(&body)).await?;
        if !response.status().is_success() {
            return Err(Self::status_error(&name, response.status()));
        }

        let bundle: SecretBundle = response.json().await.map_err(|e| VaultError::Unavailable {
            reason: format!("malformed key vault response: {e}"),
        })?;
        Self::path_from_id(&bundle.id)
    }

    async fn fetch(&self, path: &VaultPath) -> Result<Vec<u8>, VaultError> {
        let (name, version) = Self::split_path(path)?;
        let url = self.url(&format!("secrets/{name}/{version}"))?;

        let response = self.send(self.client.get(url)).await?;
        if !response.status().is_success() {
            return Err(Self::status_error(path.as_str(), response.status()));
        }

        let bundle: SecretBundle = response.json().await.map_err(|e| VaultError::Unavailable {
            reason: format!("malformed key vault response: {e}"),
        })?;
        let value = bundle.value.ok_or_else(|| VaultError::NotFound {
            path: path.as_str().to_string(),
        })?;
        BASE64.decode(value).map_err(|e| VaultError::Unavailable {
            reason: format!("secret value is not valid base64: {e}"),
        })
    }

    async fn retire(&self, path: &VaultPath) -> Result<(), VaultError> {
        let (name, version) = Self::split_path(path)?;
        let url = self.url(&format!("secrets/{name}/{version}"))?;
        let body = json!({ "attributes": { "enabled": false } });

        let response = self.send(self.client.patch(url).json(&body)).await?;
        match response.status() {
            // Disabling an already-disabled version responds 200, so this is
            // naturally idempotent.
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(VaultError::NotFound {
                path: path.as_str().to_string(),
            }),
            status => Err(Self::status_error(path.as_str(), status)),
        }
    }

    async fn list_versions(&self, path_hint: &str) -> Result<Vec<VaultPath>, VaultError> {
        let name = Self::secret_name(path_hint);
        let url = self.url(&format!("secrets/{name}/versions"))?;

        let response = self.send(self.client.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(Self::status_error(&name, response.status()));
        }

        let list: SecretVersionList =
            response.json().await.map_err(|e| VaultError::Unavailable {
                reason: format!("malformed key vault response: {e}"),
            })?;

        let mut versions = Vec::new();
        for item in list.value {
            let enabled = item
                .attributes
                .as_ref()
                .and_then(|a| a.enabled)
                .unwrap_or(true);
            if enabled {
                versions.push(Self::path_from_id(&item.id)?);
            }
        }
        versions.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(versions)
    }

    async fn healthcheck(&self) -> Result<(), VaultError> {
        let mut url = self.url("secrets")?;
        url.query_pairs_mut().append_pair("maxresults", "1");

        let response = self.send(self.client.get(url)).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(VaultError::Unavailable {
                reason: format!("key vault healthcheck returned {}", response.status()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_names_are_key_vault_safe() {
        assert_eq!(
            AzureKeyVaultBackend::secret_name("svc-account@corp/password"),
            "svc-account-corp-password"
        );
    }

    #[test]
    fn bundle_id_parses_into_name_and_version() {
        let path = AzureKeyVaultBackend::path_from_id(
            "https://myvault.vault.azure.net/secrets/app-pw/abc123",
        )
        .unwrap();
        assert_eq!(path.as_str(), "app-pw/abc123");
    }

    #[test]
    fn malformed_bundle_id_is_rejected() {
        assert!(AzureKeyVaultBackend::path_from_id("").is_err());
    }
}
