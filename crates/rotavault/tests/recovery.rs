//! Crash-recovery scenarios
//!
//! A crashed process leaves its credential parked in RotationInProgress with
//! a pending attempt. The record store is shared with an out-of-band manager
//! here to stage that state, the way a dead process would have left it.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use pretty_assertions::assert_eq;

use rotavault::directory::MockDirectory;
use rotavault::prelude::*;
use rotavault::record::{MemoryRecordStore, RecordManager, RecordStore};
use rotavault::{AttemptOutcome, RotationAttempt};

fn rig() -> (Arc<MemoryRecordStore>, RotationEngine) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let store = Arc::new(MemoryRecordStore::new());
    let config = EngineConfig::in_memory(MasterKeySource::Base64(BASE64.encode([5u8; 32])));
    let engine = RotationEngine::builder(config)
        .directory(Arc::new(MockDirectory::new()) as Arc<dyn DirectoryService>)
        .record_store(Arc::clone(&store) as Arc<dyn RecordStore>)
        .build()
        .unwrap();
    (store, engine)
}

/// Park a credential the way a process that died mid-rotation would have
async fn simulate_crash(store: &Arc<MemoryRecordStore>, id: CredentialId) {
    let manager = RecordManager::new(Arc::clone(store) as Arc<dyn RecordStore>);
    manager.begin_rotation(id).await.unwrap();
    manager
        .put_attempt(RotationAttempt::begin(id, 1, Utc::now()))
        .await
        .unwrap();
}

#[tokio::test]
async fn startup_recovery_reverts_to_the_previous_version() {
    let (store, engine) = rig();
    let cred = engine
        .create_credential(
            "svc-crashed",
            CredentialKind::Password,
            None,
            AuditActor::Scheduler,
        )
        .await
        .unwrap();
    let original = engine
        .fetch_current(cred.id, AuditActor::Scheduler)
        .await
        .unwrap();

    simulate_crash(&store, cred.id).await;
    let parked = engine.get_credential(cred.id).await.unwrap();
    assert_eq!(parked.status, CredentialStatus::RotationInProgress);

    let recovered = engine.recover_abandoned().await.unwrap();
    assert_eq!(recovered, vec![cred.id]);

    // Back on the old secret, as if the rotation never started.
    let after = engine.get_credential(cred.id).await.unwrap();
    assert_eq!(after.status, CredentialStatus::Active);
    assert_eq!(after.version, 1);
    assert_eq!(after.vault_path, cred.vault_path);
    let current = engine
        .fetch_current(cred.id, AuditActor::Scheduler)
        .await
        .unwrap();
    assert_eq!(current, original);
}

#[tokio::test]
async fn recovery_closes_the_orphaned_attempt() {
    let (store, engine) = rig();
    let cred = engine
        .create_credential(
            "svc-orphaned",
            CredentialKind::ClientSecret,
            None,
            AuditActor::Scheduler,
        )
        .await
        .unwrap();
    simulate_crash(&store, cred.id).await;

    engine.recover_abandoned().await.unwrap();

    let history = engine.attempt_history(cred.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, AttemptOutcome::Abandoned);
    assert!(history[0].completed_at.is_some());
}

#[tokio::test]
async fn recovery_is_a_no_op_on_a_healthy_store() {
    let (_store, engine) = rig();
    engine
        .create_credential(
            "svc-healthy",
            CredentialKind::Password,
            None,
            AuditActor::Scheduler,
        )
        .await
        .unwrap();

    assert!(engine.recover_abandoned().await.unwrap().is_empty());
}

#[tokio::test]
async fn recovered_credential_rotates_normally_afterwards() {
    let (store, engine) = rig();
    let cred = engine
        .create_credential(
            "svc-resumed",
            CredentialKind::Password,
            None,
            AuditActor::Scheduler,
        )
        .await
        .unwrap();
    simulate_crash(&store, cred.id).await;
    engine.recover_abandoned().await.unwrap();

    engine
        .rotate_now(cred.id, AuditActor::Scheduler)
        .await
        .unwrap()
        .expect("recovered credential should rotate");

    let after = engine.get_credential(cred.id).await.unwrap();
    assert_eq!(after.version, 2);

    let history = engine.attempt_history(cred.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].outcome, AttemptOutcome::Abandoned);
    assert_eq!(history[1].outcome, AttemptOutcome::Succeeded);
}
