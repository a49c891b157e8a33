//! End-to-end rotation scenarios through the engine facade

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use pretty_assertions::assert_eq;

use rotavault::audit::{AuditOperation, AuditResult, AuditSink, MemoryAuditSink};
use rotavault::directory::MockDirectory;
use rotavault::prelude::*;
use rotavault::{AttemptOutcome, DirectoryError, RotationError};

fn fast_policy() -> RotationPolicy {
    RotationPolicy {
        interval_days: 90,
        retry_limit: 3,
        backoff_base: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    }
}

struct Rig {
    directory: Arc<MockDirectory>,
    audit: Arc<MemoryAuditSink>,
    engine: RotationEngine,
}

fn rig() -> Rig {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let directory = Arc::new(MockDirectory::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let config = EngineConfig::in_memory(MasterKeySource::Base64(BASE64.encode([3u8; 32])));
    let engine = RotationEngine::builder(config)
        .directory(Arc::clone(&directory) as Arc<dyn DirectoryService>)
        .audit_sink(Arc::clone(&audit) as Arc<dyn AuditSink>)
        .build()
        .unwrap();
    Rig {
        directory,
        audit,
        engine,
    }
}

#[tokio::test]
async fn transient_outage_recovers_within_the_retry_budget() {
    let rig = rig();
    let cred = rig
        .engine
        .create_credential(
            "svc-reporting",
            CredentialKind::Password,
            Some(fast_policy()),
            AuditActor::Scheduler,
        )
        .await
        .unwrap();
    rig.directory.fail_transiently(3);

    let attempt = rig
        .engine
        .rotate_now(cred.id, AuditActor::Scheduler)
        .await
        .unwrap()
        .expect("uncontended rotation");
    assert_eq!(attempt.attempt_number, 4);
    assert_eq!(attempt.new_version, Some(2));

    let history = rig.engine.attempt_history(cred.id).await.unwrap();
    assert_eq!(history.len(), 4);
    assert!(history[..3]
        .iter()
        .all(|a| a.outcome == AttemptOutcome::Failed));
    assert_eq!(history[3].outcome, AttemptOutcome::Succeeded);

    // The secret the directory received is the one the vault now serves.
    let current = rig
        .engine
        .fetch_current(cred.id, AuditActor::Scheduler)
        .await
        .unwrap();
    let applied = rig.directory.applied();
    assert_eq!(applied.last().unwrap().2, current);

    let after = rig.engine.get_credential(cred.id).await.unwrap();
    assert_eq!(after.version, 2);
    assert_eq!(after.rotation_count, 1);
    assert_eq!(after.status, CredentialStatus::Active);
}

#[tokio::test]
async fn retry_budget_exhaustion_keeps_the_old_secret_live() {
    let rig = rig();
    let cred = rig
        .engine
        .create_credential(
            "svc-batch",
            CredentialKind::ClientSecret,
            Some(fast_policy()),
            AuditActor::Scheduler,
        )
        .await
        .unwrap();
    let before = rig
        .engine
        .fetch_current(cred.id, AuditActor::Scheduler)
        .await
        .unwrap();

    rig.directory.fail_transiently(4);
    let err = rig
        .engine
        .rotate_now(cred.id, AuditActor::Scheduler)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rotation(RotationError::RetriesExhausted { attempts: 4, .. })
    ));

    let after = rig.engine.get_credential(cred.id).await.unwrap();
    assert_eq!(after.status, CredentialStatus::Active);
    assert_eq!(after.version, 1);
    assert_eq!(after.vault_path, cred.vault_path);

    let still = rig
        .engine
        .fetch_current(cred.id, AuditActor::Scheduler)
        .await
        .unwrap();
    assert_eq!(still, before);
}

#[tokio::test]
async fn permanent_directory_rejection_skips_the_retry_ladder() {
    let rig = rig();
    let cred = rig
        .engine
        .create_credential(
            "svc-gone",
            CredentialKind::Password,
            Some(fast_policy()),
            AuditActor::Scheduler,
        )
        .await
        .unwrap();
    rig.directory.respond_with(Err(DirectoryError::Permanent {
        reason: "identity does not exist".to_string(),
    }));

    let err = rig
        .engine
        .rotate_now(cred.id, AuditActor::Scheduler)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rotation(RotationError::PermanentApply { .. })
    ));
    assert_eq!(rig.engine.attempt_history(cred.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_manual_rotations_resolve_to_one_winner() {
    let rig = rig();
    let cred = rig
        .engine
        .create_credential(
            "svc-contended",
            CredentialKind::Password,
            Some(fast_policy()),
            AuditActor::Scheduler,
        )
        .await
        .unwrap();

    // Park the first caller mid-apply so the second demonstrably arrives
    // while the rotation is claimed.
    let hold = rig.directory.hold_next_apply();
    let (first, second) = tokio::join!(
        rig.engine
            .rotate_now(cred.id, AuditActor::Operator("alice".to_string())),
        async {
            hold.entered().await;
            let contender = rig
                .engine
                .rotate_now(cred.id, AuditActor::Operator("bob".to_string()))
                .await;
            hold.release();
            contender
        },
    );
    assert!(first.unwrap().is_some());
    assert!(second.unwrap().is_none());

    // Exactly one version bump despite two callers.
    let after = rig.engine.get_credential(cred.id).await.unwrap();
    assert_eq!(after.version, 2);
    assert_eq!(rig.directory.apply_count(), 1);
}

#[tokio::test]
async fn scheduler_sweep_rotates_due_and_reschedules() {
    let rig = rig();
    let mut ids = Vec::new();
    for i in 0..4 {
        let cred = rig
            .engine
            .create_credential(
                format!("svc-{i}"),
                CredentialKind::Password,
                Some(RotationPolicy {
                    interval_days: 1,
                    ..fast_policy()
                }),
                AuditActor::Scheduler,
            )
            .await
            .unwrap();
        ids.push(cred.id);
    }

    // Nothing is due yet.
    let report = rig.engine.run_due_rotations(Utc::now()).await.unwrap();
    assert_eq!(report.scanned, 0);

    // Two days later everything is.
    let later = Utc::now() + chrono::Duration::days(2);
    let report = rig.engine.run_due_rotations(later).await.unwrap();
    assert_eq!(report.scanned, 4);
    assert_eq!(report.rotated, 4);
    assert_eq!(report.failed, 0);

    // Each rotation reschedules from commit time.
    for id in ids {
        let cred = rig.engine.get_credential(id).await.unwrap();
        assert_eq!(cred.version, 2);
        assert_eq!(cred.rotation_count, 1);
        assert!(cred.next_rotation_due_at.unwrap() > Utc::now());
    }
}

#[tokio::test]
async fn audit_trail_records_the_full_lifecycle() {
    let rig = rig();
    let cred = rig
        .engine
        .create_credential(
            "svc-audited",
            CredentialKind::Password,
            Some(fast_policy()),
            AuditActor::Operator("setup".to_string()),
        )
        .await
        .unwrap();
    rig.engine
        .fetch_current(cred.id, AuditActor::Operator("app".to_string()))
        .await
        .unwrap();
    rig.engine
        .rotate_now(cred.id, AuditActor::Scheduler)
        .await
        .unwrap();
    rig.engine
        .retire_credential(cred.id, AuditActor::Operator("teardown".to_string()))
        .await
        .unwrap();

    let trail = rig.audit.entries();
    let operations: Vec<_> = trail.iter().map(|e| e.operation).collect();
    assert_eq!(
        operations,
        vec![
            AuditOperation::Store,
            AuditOperation::Fetch,
            AuditOperation::Retire, // previous version withdrawn by the rotation
            AuditOperation::Rotate,
            AuditOperation::Retire, // decommission
        ]
    );
    assert!(trail.iter().all(|e| e.result == AuditResult::Success));
    assert!(trail.iter().all(|e| e.verify_checksum()));
    assert!(trail.iter().all(|e| e.credential_id == cred.id));
}
