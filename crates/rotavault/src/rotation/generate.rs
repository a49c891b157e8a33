//! Candidate secret generation
//!
//! Passwords are sampled against a complexity profile; client secrets and
//! certificate material are raw random bytes in a transport-safe encoding.

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine as _;
use rand::seq::IndexedRandom;
use rand::{Rng, RngCore};

use crate::core::{CredentialKind, SecretString};

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*()-_=+[]{}";

const CLIENT_SECRET_BYTES: usize = 48;
const CERTIFICATE_MATERIAL_BYTES: usize = 64;

/// Password shape requirements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexityProfile {
    pub length: usize,
    pub require_upper: bool,
    pub require_lower: bool,
    pub require_digit: bool,
    pub require_symbol: bool,
}

impl Default for ComplexityProfile {
    fn default() -> Self {
        Self {
            length: 32,
            require_upper: true,
            require_lower: true,
            require_digit: true,
            require_symbol: true,
        }
    }
}

impl ComplexityProfile {
    fn required_classes(&self) -> Vec<&'static [u8]> {
        let mut classes = Vec::new();
        if self.require_upper {
            classes.push(UPPER);
        }
        if self.require_lower {
            classes.push(LOWER);
        }
        if self.require_digit {
            classes.push(DIGITS);
        }
        if self.require_symbol {
            classes.push(SYMBOLS);
        }
        classes
    }

    fn alphabet(&self) -> Vec<u8> {
        let classes = self.required_classes();
        if classes.is_empty() {
            // Degenerate profile; fall back to the full alphabet.
            [UPPER, LOWER, DIGITS, SYMBOLS].concat()
        } else {
            classes.concat()
        }
    }

    /// Whether `candidate` satisfies every required class
    pub fn satisfied_by(&self, candidate: &str) -> bool {
        let has = |class: &[u8]| candidate.bytes().any(|b| class.contains(&b));
        (!self.require_upper || has(UPPER))
            && (!self.require_lower || has(LOWER))
            && (!self.require_digit || has(DIGITS))
            && (!self.require_symbol || has(SYMBOLS))
            && candidate.len() >= self.length
    }
}

/// Produce a fresh secret appropriate for `kind`
pub fn generate_secret(kind: CredentialKind, profile: &ComplexityProfile) -> SecretString {
    match kind {
        CredentialKind::Password => generate_password(profile),
        CredentialKind::ClientSecret => {
            let mut bytes = [0u8; CLIENT_SECRET_BYTES];
            rand::rng().fill_bytes(&mut bytes);
            SecretString::from(URL_SAFE_NO_PAD.encode(bytes))
        }
        CredentialKind::Certificate => {
            let mut bytes = [0u8; CERTIFICATE_MATERIAL_BYTES];
            rand::rng().fill_bytes(&mut bytes);
            SecretString::from(BASE64.encode(bytes))
        }
    }
}

fn generate_password(profile: &ComplexityProfile) -> SecretString {
    let mut rng = rand::rng();
    let classes = profile.required_classes();
    let alphabet = profile.alphabet();
    let length = profile.length.max(classes.len()).max(8);

    let mut bytes: Vec<u8> = Vec::with_capacity(length);
    // One guaranteed character per required class, then uniform fill.
    for class in &classes {
        if let Some(b) = class.choose(&mut rng) {
            bytes.push(*b);
        }
    }
    while bytes.len() < length {
        if let Some(b) = alphabet.as_slice().choose(&mut rng) {
            bytes.push(*b);
        }
    }
    // Fisher-Yates so the guaranteed characters are not positionally biased.
    for i in (1..bytes.len()).rev() {
        let j = rng.random_range(0..=i);
        bytes.swap(i, j);
    }

    // The alphabet is pure ASCII.
    SecretString::from(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_satisfy_the_default_profile() {
        let profile = ComplexityProfile::default();
        for _ in 0..32 {
            let secret = generate_secret(CredentialKind::Password, &profile);
            secret.expose(|s| {
                assert!(profile.satisfied_by(s), "profile violated by {}", s.len());
            });
        }
    }

    #[test]
    fn relaxed_profile_skips_unrequired_classes() {
        let profile = ComplexityProfile {
            length: 16,
            require_symbol: false,
            ..ComplexityProfile::default()
        };
        let secret = generate_secret(CredentialKind::Password, &profile);
        secret.expose(|s| assert_eq!(s.len(), 16));
    }

    #[test]
    fn client_secrets_are_url_safe() {
        let secret = generate_secret(CredentialKind::ClientSecret, &ComplexityProfile::default());
        secret.expose(|s| {
            assert!(s
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
        });
    }

    #[test]
    fn consecutive_secrets_differ() {
        let profile = ComplexityProfile::default();
        for kind in [
            CredentialKind::Password,
            CredentialKind::ClientSecret,
            CredentialKind::Certificate,
        ] {
            let a = generate_secret(kind, &profile);
            let b = generate_secret(kind, &profile);
            assert_ne!(a, b);
        }
    }
}
