//! # rotavault
//!
//! Credential vault and rotation engine: encrypted secret storage over
//! pluggable backends, credential lifecycle records, and an orchestrator
//! that rotates secrets on schedule with retry, crash recovery, and an
//! append-only audit trail.
//!
//! ## Architecture
//!
//! - [`cipher`]: sealed-blob authenticated encryption under a master key
//! - [`backend`]: storage adapters (local file, in-memory, Azure Key Vault,
//!   KV v2)
//! - [`vault`]: the encrypting facade every secret passes through
//! - [`record`]: credential metadata, lifecycle transitions, attempt history
//! - [`rotation`]: secret generation, the rotation state machine, and the
//!   orchestrator
//! - [`scheduler`]: periodic sweeps over a bounded worker pool
//! - [`audit`]: checksummed append-only audit sinks
//! - [`engine`]: the [`RotationEngine`] facade wiring it all together
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rotavault::prelude::*;
//!
//! # async fn run(directory: Arc<dyn DirectoryService>) -> EngineResult<()> {
//! let config = EngineConfig::in_memory(MasterKeySource::Env(
//!     "ROTAVAULT_MASTER_KEY".to_string(),
//! ));
//! let engine = RotationEngine::builder(config).directory(directory).build()?;
//!
//! engine.recover_abandoned().await?;
//! let cred = engine
//!     .create_credential(
//!         "svc-reporting",
//!         CredentialKind::Password,
//!         None,
//!         AuditActor::Operator("setup".to_string()),
//!     )
//!     .await?;
//! engine.rotate_now(cred.id, AuditActor::Scheduler).await?;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod backend;
pub mod cipher;
pub mod config;
pub mod core;
pub mod directory;
pub mod engine;
pub mod record;
pub mod rotation;
pub mod scheduler;
pub mod vault;

pub use crate::core::{
    AttemptId, AttemptOutcome, CipherError, Credential, CredentialId, CredentialKind,
    CredentialStatus, DirectoryError, EngineError, EngineResult, RecordError, RotationAttempt,
    RotationError, RotationPolicy, SecretString, VaultError, VaultPath,
};
pub use audit::{AuditActor, AuditEntry, AuditOperation, AuditResult, AuditSink};
pub use cipher::MasterKey;
pub use config::{BackendConfig, EngineConfig, MasterKeySource};
pub use directory::DirectoryService;
pub use engine::{RotationEngine, RotationEngineBuilder};
pub use scheduler::SweepReport;

/// Common imports for engine consumers
pub mod prelude {
    pub use crate::audit::{AuditActor, AuditOperation, AuditResult, AuditSink};
    pub use crate::config::{BackendConfig, EngineConfig, MasterKeySource};
    pub use crate::core::{
        Credential, CredentialId, CredentialKind, CredentialStatus, EngineError, EngineResult,
        RotationPolicy, SecretString,
    };
    pub use crate::directory::DirectoryService;
    pub use crate::engine::{RotationEngine, RotationEngineBuilder};
    pub use crate::scheduler::SweepReport;
}
