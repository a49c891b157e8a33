//! Secret value wrapper with scoped exposure and zeroization
//!
//! Plaintext secrets only ever live inside a [`SecretString`]. The value is
//! redacted in `Debug`/`Display`/`Serialize` output and the underlying memory
//! is zeroed on drop.

use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A plaintext secret value
///
/// Access goes through [`expose`](SecretString::expose) so the borrow cannot
/// outlive a deliberate scope. Comparisons are constant-time.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString {
    value: String,
}

impl SecretString {
    /// Wrap a plaintext value
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Run `f` against the plaintext without letting the borrow escape
    pub fn expose<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        f(&self.value)
    }

    /// Borrow the plaintext as bytes within a scope
    pub fn expose_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self.value.as_bytes())
    }

    /// Length in bytes, without exposing the value
    #[must_use]
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// Whether the secret is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.value.as_bytes().ct_eq(other.value.as_bytes()))
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

// Serializes redacted so a secret can never leak through a serialized record.
impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("***")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString::new)
    }
}
