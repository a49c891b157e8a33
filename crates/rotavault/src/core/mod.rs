//! Core types: identifiers, the credential data model, errors, secrets

pub mod attempt;
pub mod credential;
pub mod error;
pub mod id;
pub mod secret;

pub use attempt::{AttemptOutcome, RotationAttempt};
pub use credential::{
    Credential, CredentialKind, CredentialStatus, RotationPolicy, VaultPath,
};
pub use error::{
    CipherError, DirectoryError, EngineError, EngineResult, RecordError, RotationError, VaultError,
};
pub use id::{AttemptId, CredentialId};
pub use secret::SecretString;
