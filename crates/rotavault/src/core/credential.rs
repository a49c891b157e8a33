//! The credential record: the non-secret metadata half of a managed secret
//!
//! The plaintext itself never appears here; `vault_path` is an opaque locator
//! into the configured backend for the current immutable version.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::RecordError;
use super::id::CredentialId;

/// What kind of secret a credential manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Service-account password
    Password,
    /// Application client secret
    ClientSecret,
    /// Certificate key material
    Certificate,
}

impl CredentialKind {
    /// Stable lowercase name, used in vault path hints and audit details
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::ClientSecret => "client_secret",
            Self::Certificate => "certificate",
        }
    }
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a credential row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    /// Current secret is live and fetchable
    Active,
    /// A rotation owns this row; exactly one in-flight rotation per credential
    RotationInProgress,
    /// Decommissioned; a newer credential (or none) replaces it
    Retired,
    /// Past `expires_at` without a successful rotation
    Expired,
}

impl std::fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::RotationInProgress => "rotation_in_progress",
            Self::Retired => "retired",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Opaque, backend-specific locator for one immutable secret version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct VaultPath(String);

impl VaultPath {
    /// Wrap a backend-produced locator
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The raw locator string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VaultPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-credential rotation policy
///
/// Intervals, retry budget, and backoff shape are configurable per credential;
/// the defaults here are operational starting points, not contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPolicy {
    /// Rotate every this many days
    pub interval_days: u32,

    /// Retries after the first failed try before the rotation fails
    pub retry_limit: u32,

    /// Base delay for exponential backoff
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,

    /// Upper bound on any single backoff delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            interval_days: 90,
            retry_limit: 3,
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RotationPolicy {
    /// Check the policy for nonsensical values
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.interval_days == 0 {
            return Err(RecordError::Store {
                reason: "rotation interval must be at least one day".to_string(),
            });
        }
        if self.backoff_base.is_zero() {
            return Err(RecordError::Store {
                reason: "backoff base must be positive".to_string(),
            });
        }
        if self.max_backoff < self.backoff_base {
            return Err(RecordError::Store {
                reason: format!(
                    "max backoff {:?} is below the backoff base {:?}",
                    self.max_backoff, self.backoff_base
                ),
            });
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped
    ///
    /// No jitter: delays must be non-decreasing across attempts so callers can
    /// reason about worst-case rotation latency.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Total tries a rotation makes: the initial one plus `retry_limit` retries
    #[must_use]
    pub fn total_tries(&self) -> u32 {
        self.retry_limit.saturating_add(1)
    }
}

/// One secret under management
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Stable identifier
    pub id: CredentialId,

    /// Reference to the external identity this secret authenticates.
    /// Opaque to the engine; owned by the directory service.
    pub owner_ref: String,

    /// Secret kind
    pub kind: CredentialKind,

    /// Locator for the current secret version; never the secret itself
    pub vault_path: VaultPath,

    /// Lifecycle status
    pub status: CredentialStatus,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last successful rotation, if any
    pub last_rotated_at: Option<DateTime<Utc>>,

    /// Hard expiry, if any
    pub expires_at: Option<DateTime<Utc>>,

    /// When the next scheduled rotation is due
    pub next_rotation_due_at: Option<DateTime<Utc>>,

    /// Rotation policy for this credential
    pub rotation_policy: RotationPolicy,

    /// Monotonically increasing secret version; bumps on every commit
    pub version: u32,

    /// Successful rotations to date
    pub rotation_count: u32,

    /// Whether the scheduler may rotate this credential
    pub auto_rotation_enabled: bool,

    /// Times the plaintext has been fetched
    pub fetch_count: u64,

    /// Last plaintext fetch, if any
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Build a new Active credential at version 1
    pub fn new(
        owner_ref: impl Into<String>,
        kind: CredentialKind,
        vault_path: VaultPath,
        policy: RotationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let due = now + ChronoDuration::days(i64::from(policy.interval_days));
        Self {
            id: CredentialId::generate(),
            owner_ref: owner_ref.into(),
            kind,
            vault_path,
            status: CredentialStatus::Active,
            created_at: now,
            last_rotated_at: None,
            expires_at: None,
            next_rotation_due_at: Some(due),
            rotation_policy: policy,
            version: 1,
            rotation_count: 0,
            auto_rotation_enabled: true,
            fetch_count: 0,
            last_fetched_at: None,
        }
    }

    /// Whether the scheduler should pick this credential up at `as_of`
    #[must_use]
    pub fn is_due(&self, as_of: DateTime<Utc>) -> bool {
        self.status == CredentialStatus::Active
            && self.auto_rotation_enabled
            && self
                .next_rotation_due_at
                .is_some_and(|due| due <= as_of)
    }

    /// Whether the credential is past its hard expiry
    #[must_use]
    pub fn is_expired(&self, as_of: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= as_of)
    }

    /// Recompute `next_rotation_due_at` from `from` per the policy
    pub fn schedule_next_rotation(&mut self, from: DateTime<Utc>) {
        self.next_rotation_due_at =
            Some(from + ChronoDuration::days(i64::from(self.rotation_policy.interval_days)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(interval_days: u32) -> RotationPolicy {
        RotationPolicy {
            interval_days,
            ..RotationPolicy::default()
        }
    }

    #[test]
    fn new_credential_is_active_at_version_one() {
        let now = Utc::now();
        let cred = Credential::new(
            "svc-reporting",
            CredentialKind::Password,
            VaultPath::new("svc-reporting/password/abc"),
            policy(90),
            now,
        );
        assert_eq!(cred.status, CredentialStatus::Active);
        assert_eq!(cred.version, 1);
        assert_eq!(
            cred.next_rotation_due_at,
            Some(now + ChronoDuration::days(90))
        );
    }

    #[test]
    fn due_check_respects_status_and_toggle() {
        let now = Utc::now();
        let mut cred = Credential::new(
            "svc",
            CredentialKind::ClientSecret,
            VaultPath::new("svc/client_secret/x"),
            policy(1),
            now - ChronoDuration::days(2),
        );
        assert!(cred.is_due(now));

        cred.auto_rotation_enabled = false;
        assert!(!cred.is_due(now));

        cred.auto_rotation_enabled = true;
        cred.status = CredentialStatus::RotationInProgress;
        assert!(!cred.is_due(now));
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RotationPolicy {
            interval_days: 90,
            retry_limit: 5,
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
        };
        assert_eq!(policy.backoff_for(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(8));
        // capped from here on
        assert_eq!(policy.backoff_for(4), Duration::from_secs(8));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(8));
    }

    #[test]
    fn backoff_is_non_decreasing() {
        let policy = RotationPolicy::default();
        let mut last = Duration::ZERO;
        for attempt in 0..16 {
            let delay = policy.backoff_for(attempt);
            assert!(delay >= last, "delay shrank at attempt {attempt}");
            last = delay;
        }
    }

    #[test]
    fn policy_validation_rejects_bad_shapes() {
        assert!(policy(0).validate().is_err());

        let inverted = RotationPolicy {
            backoff_base: Duration::from_secs(10),
            max_backoff: Duration::from_secs(1),
            ..RotationPolicy::default()
        };
        assert!(inverted.validate().is_err());

        assert!(RotationPolicy::default().validate().is_ok());
    }
}
