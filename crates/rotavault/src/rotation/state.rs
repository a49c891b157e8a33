//! Rotation step state machine
//!
//! A rotation run walks the forward chain
//! Idle -> Generating -> ExternallyApplying -> Verifying -> Committing -> Done.
//! Verification is optional, so ExternallyApplying may also step straight to
//! Committing. Transient failures detour through Retrying back to Generating;
//! permanent failures and retry exhaustion land in Failed. Terminal steps
//! accept no further transitions.

use serde::{Deserialize, Serialize};

use crate::core::RotationError;

/// Where a rotation run currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStep {
    /// No rotation underway
    Idle,
    /// Producing and storing the candidate secret
    Generating,
    /// Pushing the candidate to the external system of record
    ExternallyApplying,
    /// Confirming the stored secret reads back intact
    Verifying,
    /// Swapping the credential record onto the new version
    Committing,
    /// Rotation complete
    Done,
    /// Transient failure; waiting out backoff before the next try
    Retrying,
    /// Rotation gave up
    Failed,
}

impl RotationStep {
    /// Whether `next` is a legal successor of `self`
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        use RotationStep::*;
        matches!(
            (self, next),
            (Idle, Generating)
                | (Generating, ExternallyApplying)
                | (ExternallyApplying, Verifying | Committing)
                | (Verifying, Committing)
                | (Committing, Done)
                | (Generating | ExternallyApplying | Verifying | Committing, Retrying)
                | (Retrying, Generating)
                | (Generating | ExternallyApplying | Verifying | Committing | Retrying, Failed)
        )
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition_to(&mut self, next: Self) -> Result<(), RotationError> {
        if !self.can_transition_to(next) {
            return Err(RotationError::InvalidStep {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }

    /// Whether the step accepts no further transitions
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for RotationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::ExternallyApplying => "externally_applying",
            Self::Verifying => "verifying",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RotationStep::*;

    #[test]
    fn happy_path_walks_the_forward_chain() {
        let mut step = Idle;
        for next in [Generating, ExternallyApplying, Verifying, Committing, Done] {
            step.transition_to(next).unwrap();
        }
        assert!(step.is_terminal());
    }

    #[test]
    fn transient_failure_detours_through_retrying() {
        let mut step = Idle;
        step.transition_to(Generating).unwrap();
        step.transition_to(ExternallyApplying).unwrap();
        step.transition_to(Retrying).unwrap();
        step.transition_to(Generating).unwrap();
    }

    #[test]
    fn verification_step_can_be_skipped() {
        let mut step = Idle;
        for next in [Generating, ExternallyApplying, Committing, Done] {
            step.transition_to(next).unwrap();
        }
        assert!(step.is_terminal());
    }

    #[test]
    fn exhausted_retries_fail() {
        let mut step = Retrying;
        step.transition_to(Failed).unwrap();
        assert!(step.is_terminal());
    }

    #[test]
    fn terminal_steps_accept_nothing() {
        for terminal in [Done, Failed] {
            for next in [
                Idle,
                Generating,
                ExternallyApplying,
                Verifying,
                Committing,
                Done,
                Retrying,
                Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn skipping_steps_is_rejected() {
        let mut step = Generating;
        assert!(matches!(
            step.transition_to(Committing),
            Err(RotationError::InvalidStep { .. })
        ));
        // The failed transition leaves the step unchanged.
        assert_eq!(step, Generating);
    }
}
