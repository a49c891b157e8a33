//! Rotation scheduler
//!
//! Sweeps the record store for due credentials and fans rotations out over a
//! bounded worker pool. Per-credential failures are reported in the sweep
//! summary, never propagated; one bad credential must not stall the sweep.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::AuditActor;
use crate::core::{CredentialId, RecordError};
use crate::record::RecordManager;
use crate::rotation::Orchestrator;

/// Outcome summary of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Due credentials examined
    pub scanned: usize,
    /// Rotations that committed
    pub rotated: usize,
    /// Rotations that failed terminally
    pub failed: usize,
    /// Credentials skipped (contended or newly expired)
    pub skipped: usize,
}

/// Periodic rotation driver over a bounded worker pool
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    records: RecordManager,
    workers: usize,
    page_size: usize,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, records: RecordManager, workers: usize) -> Self {
        Self {
            orchestrator,
            records,
            workers: workers.max(1),
            page_size: 64,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// One sweep: rotate everything due at `as_of`
    ///
    /// Credentials past their hard expiry are moved to Expired instead of
    /// being rotated. At most `workers` rotations run at once.
    pub async fn run_due_rotations(&self, as_of: DateTime<Utc>) -> Result<SweepReport, RecordError> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<RotationOutcome> = JoinSet::new();
        let mut report = SweepReport::default();
        // A credential rotated mid-sweep can fall due again relative to a
        // far-future `as_of`; each id gets at most one shot per sweep.
        let mut seen: HashSet<CredentialId> = HashSet::new();

        let mut due = self.records.due_for_rotation(as_of, self.page_size);
        loop {
            let page = due.next_page().await?;
            if page.is_empty() {
                break;
            }

            for credential in page {
                if !seen.insert(credential.id) {
                    continue;
                }
                report.scanned += 1;

                if credential.is_expired(as_of) {
                    match self.records.mark_expired(credential.id).await {
                        Ok(_) => {
                            warn!(credential_id = %credential.id, "credential expired unrotated");
                            report.skipped += 1;
                        }
                        // Lost a race; whoever won owns the row now.
                        Err(RecordError::StatusConflict { .. }) => report.skipped += 1,
                        Err(other) => return Err(other),
                    }
                    continue;
                }

                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    // The semaphore is never closed while sweeping.
                    Err(_) => break,
                };
                let orchestrator = Arc::clone(&self.orchestrator);
                let id = credential.id;
                tasks.spawn(async move {
                    let _permit = permit;
                    match orchestrator.rotate(id, AuditActor::Scheduler).await {
                        Ok(Some(_)) => RotationOutcome::Rotated,
                        Ok(None) => RotationOutcome::Contended,
                        Err(e) => {
                            error!(credential_id = %id, error = %e, "scheduled rotation failed");
                            RotationOutcome::Failed
                        }
                    }
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(RotationOutcome::Rotated) => report.rotated += 1,
                Ok(RotationOutcome::Contended) => report.skipped += 1,
                Ok(RotationOutcome::Failed) => report.failed += 1,
                Err(e) => {
                    error!(error = %e, "rotation worker panicked");
                    report.failed += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            rotated = report.rotated,
            failed = report.failed,
            skipped = report.skipped,
            "rotation sweep complete"
        );
        Ok(report)
    }

    /// Sweep every `period` until `shutdown` fires
    pub async fn run_loop(&self, period: std::time::Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_due_rotations(Utc::now()).await {
                        error!(error = %e, "rotation sweep aborted");
                    }
                }
                _ = shutdown.cancelled() => {
                    debug!("scheduler shutting down");
                    return;
                }
            }
        }
    }

    /// Close out rotations orphaned by a previous process
    pub async fn recover_abandoned(&self) -> Result<Vec<CredentialId>, RecordError> {
        self.records.recover_abandoned(Utc::now()).await
    }
}

enum RotationOutcome {
    Rotated,
    Contended,
    Failed,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.workers)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
