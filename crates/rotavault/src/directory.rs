//! Directory service: the external system that consumes rotated secrets
//!
//! The orchestrator pushes every candidate secret to the system of record
//! before committing, so the credential record never points at a secret the
//! outside world does not know about. Failures split into transient
//! (retryable) and permanent (abort the rotation).

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::{Notify, Semaphore};
use url::Url;

use crate::core::{CredentialKind, DirectoryError, SecretString};

/// Applies a new secret to the external identity it authenticates
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Push `secret` as the new credential for `owner_ref`
    async fn apply_secret(
        &self,
        owner_ref: &str,
        kind: CredentialKind,
        secret: &SecretString,
    ) -> Result<(), DirectoryError>;
}

/// Graph-style HTTP directory client
///
/// Password resets go through the user resource; client secrets and
/// certificate material go through an application credentials endpoint.
pub struct GraphDirectory {
    client: reqwest::Client,
    base_url: Url,
    access_token: String,
}

impl GraphDirectory {
    pub fn new(base_url: Url, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            access_token,
        }
    }

    fn url(&self, path: &str) -> Result<Url, DirectoryError> {
        self.base_url
            .join(path)
            .map_err(|e| DirectoryError::Permanent {
                reason: format!("invalid directory url: {e}"),
            })
    }

    fn classify(status: StatusCode) -> DirectoryError {
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            DirectoryError::Transient {
                reason: format!("directory returned {status}"),
            }
        } else {
            DirectoryError::Permanent {
                reason: format!("directory returned {status}"),
            }
        }
    }
}

#[async_trait]
impl DirectoryService for GraphDirectory {
    async fn apply_secret(
        &self,
        owner_ref: &str,
        kind: CredentialKind,
        secret: &SecretString,
    ) -> Result<(), DirectoryError> {
        let (url, body) = match kind {
            CredentialKind::Password => (
                self.url(&format!("users/{owner_ref}"))?,
                secret.expose(|s| {
                    json!({
                        "passwordProfile": {
                            "password": s,
                            "forceChangePasswordNextSignIn": false,
                        }
                    })
                }),
            ),
            CredentialKind::ClientSecret | CredentialKind::Certificate => (
                self.url(&format!("applications/{owner_ref}/credentials"))?,
                secret.expose(|s| {
                    json!({
                        "kind": kind.as_str(),
                        "value": s,
                    })
                }),
            ),
        };

        let request = match kind {
            CredentialKind::Password => self.client.patch(url),
            _ => self.client.post(url),
        };
        let response = request
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| DirectoryError::Transient {
                reason: format!("directory request failed: {e}"),
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::classify(response.status()))
        }
    }
}

impl std::fmt::Debug for GraphDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphDirectory")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

/// Scriptable directory double for tests
///
/// Responses are consumed front to back; once the script runs dry every
/// call succeeds. Applied secrets are recorded for assertions.
#[derive(Debug, Default)]
pub struct MockDirectory {
    script: Mutex<VecDeque<Result<(), DirectoryError>>>,
    applied: Mutex<Vec<(String, CredentialKind, SecretString)>>,
    hold: Mutex<Option<ApplyHold>>,
}

/// Handle for a paused apply, see [`MockDirectory::hold_next_apply`]
#[derive(Debug, Clone)]
pub struct ApplyHold {
    entered: Arc<Notify>,
    release: Arc<Semaphore>,
}

impl ApplyHold {
    /// Resolves once a caller is parked inside `apply_secret`
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the parked caller continue
    pub fn release(&self) {
        self.release.add_permits(1);
    }
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome for the next unscripted call
    pub fn respond_with(&self, outcome: Result<(), DirectoryError>) {
        self.script.lock().push_back(outcome);
    }

    /// Queue `n` transient failures
    pub fn fail_transiently(&self, n: usize) {
        for _ in 0..n {
            self.respond_with(Err(DirectoryError::Transient {
                reason: "scripted transient failure".to_string(),
            }));
        }
    }

    /// Secrets successfully applied, in call order
    pub fn applied(&self) -> Vec<(String, CredentialKind, SecretString)> {
        self.applied.lock().clone()
    }

    /// Total successful applies
    pub fn apply_count(&self) -> usize {
        self.applied.lock().len()
    }

    /// Park the next `apply_secret` call until the returned hold is released
    ///
    /// Lets a test suspend one caller at a known point so a second caller
    /// provably overlaps with it, instead of relying on scheduler timing.
    pub fn hold_next_apply(&self) -> ApplyHold {
        let hold = ApplyHold {
            entered: Arc::new(Notify::new()),
            release: Arc::new(Semaphore::new(0)),
        };
        *self.hold.lock() = Some(hold.clone());
        hold
    }
}

#[async_trait]
impl DirectoryService for MockDirectory {
    async fn apply_secret(
        &self,
        owner_ref: &str,
        kind: CredentialKind,
        secret: &SecretString,
    ) -> Result<(), DirectoryError> {
        let hold = self.hold.lock().take();
        if let Some(hold) = hold {
            hold.entered.notify_one();
            if let Ok(permit) = hold.release.acquire().await {
                permit.forget();
            }
        }
        if let Some(outcome) = self.script.lock().pop_front() {
            outcome?;
        }
        self.applied
            .lock()
            .push((owner_ref.to_string(), kind, secret.clone()));
        Ok(())
    }
}
