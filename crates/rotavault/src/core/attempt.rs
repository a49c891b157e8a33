//! Rotation attempts: the transient record of one rotation execution
//!
//! An attempt is created when a try starts and reaches exactly one terminal
//! outcome; a retry supersedes it with a fresh attempt rather than mutating
//! the finished one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::RecordError;
use super::id::{AttemptId, CredentialId};

/// Terminal and in-flight outcomes of a rotation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The attempt is running; at most one Pending attempt per credential
    Pending,
    /// The rotation committed a new version
    Succeeded,
    /// The attempt failed; `error_detail` explains why
    Failed,
    /// A crashed process owned this attempt; startup recovery closed it
    Abandoned,
}

impl AttemptOutcome {
    /// Whether this outcome ends the attempt
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// One try at rotating one credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationAttempt {
    /// Unique attempt identifier
    pub id: AttemptId,

    /// Credential being rotated
    pub credential_id: CredentialId,

    /// 1-based try counter within a rotation run
    pub attempt_number: u32,

    /// When the try started
    pub started_at: DateTime<Utc>,

    /// When the try reached a terminal outcome
    pub completed_at: Option<DateTime<Utc>>,

    /// Current outcome
    pub outcome: AttemptOutcome,

    /// Failure description; never contains secret material
    pub error_detail: Option<String>,

    /// Version the attempt produced, set once secret generation stored a blob
    pub new_version: Option<u32>,
}

impl RotationAttempt {
    /// Open a new Pending attempt
    pub fn begin(credential_id: CredentialId, attempt_number: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: AttemptId::generate(),
            credential_id,
            attempt_number,
            started_at: now,
            completed_at: None,
            outcome: AttemptOutcome::Pending,
            error_detail: None,
            new_version: None,
        }
    }

    /// Whether the attempt is still running
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.outcome == AttemptOutcome::Pending
    }

    fn finish(&mut self, outcome: AttemptOutcome, now: DateTime<Utc>) -> Result<(), RecordError> {
        if self.outcome.is_terminal() {
            return Err(RecordError::AttemptFinalized {
                id: self.credential_id,
            });
        }
        self.outcome = outcome;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Close the attempt as Succeeded with the committed version
    pub fn mark_succeeded(
        &mut self,
        new_version: u32,
        now: DateTime<Utc>,
    ) -> Result<(), RecordError> {
        self.new_version = Some(new_version);
        self.finish(AttemptOutcome::Succeeded, now)
    }

    /// Close the attempt as Failed with a cause
    pub fn mark_failed(
        &mut self,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), RecordError> {
        self.error_detail = Some(detail.into());
        self.finish(AttemptOutcome::Failed, now)
    }

    /// Close the attempt as Abandoned (startup crash recovery)
    pub fn mark_abandoned(&mut self, now: DateTime<Utc>) -> Result<(), RecordError> {
        self.error_detail
            .get_or_insert_with(|| "abandoned by startup recovery".to_string());
        self.finish(AttemptOutcome::Abandoned, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_lifecycle_success() {
        let now = Utc::now();
        let mut attempt = RotationAttempt::begin(CredentialId::generate(), 1, now);
        assert!(attempt.is_live());
        assert_eq!(attempt.outcome, AttemptOutcome::Pending);

        attempt.mark_succeeded(2, now).unwrap();
        assert_eq!(attempt.outcome, AttemptOutcome::Succeeded);
        assert_eq!(attempt.new_version, Some(2));
        assert!(attempt.completed_at.is_some());
        assert!(!attempt.is_live());
    }

    #[test]
    fn terminal_attempts_are_immutable() {
        let now = Utc::now();
        let mut attempt = RotationAttempt::begin(CredentialId::generate(), 1, now);
        attempt.mark_failed("backend unavailable", now).unwrap();

        let err = attempt.mark_succeeded(2, now).unwrap_err();
        assert!(matches!(err, RecordError::AttemptFinalized { .. }));
        assert_eq!(attempt.outcome, AttemptOutcome::Failed);
    }

    #[test]
    fn abandoned_attempt_keeps_existing_detail() {
        let now = Utc::now();
        let mut attempt = RotationAttempt::begin(CredentialId::generate(), 3, now);
        attempt.error_detail = Some("crash mid-apply".to_string());
        attempt.mark_abandoned(now).unwrap();
        assert_eq!(attempt.outcome, AttemptOutcome::Abandoned);
        assert_eq!(attempt.error_detail.as_deref(), Some("crash mid-apply"));
    }
}
