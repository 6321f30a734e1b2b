//! Access gate: password fingerprints and candidate key resolution.
//!
//! Two derivations come from the same password. The fingerprint
//! `base64(SHA256(SHA256(password)))` is published in the plaintext index and
//! per-channel descriptors; the cipher key is `SHA256(password)`. Knowing a
//! fingerprint does not give the cipher key.

use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};

use crate::error::ArchiveError;

/// Raw AES-256 key derived from a password.
pub fn decryption_key(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

/// Fingerprint used to test password membership against stored hashes.
pub fn key_hash(password: &str) -> String {
    let inner = decryption_key(password);
    STANDARD.encode(Sha256::digest(inner))
}

/// Return the first candidate whose fingerprint equals `stored_hash`.
pub fn resolve_access<'a, I>(candidates: I, stored_hash: &str) -> Result<&'a str, ArchiveError>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .find(|candidate| key_hash(candidate) == stored_hash)
        .ok_or_else(|| ArchiveError::NoMatchingKey {
            scope: format!("fingerprint {stored_hash}"),
        })
}

/// Ordered, de-duplicated set of candidate passwords supplied by the user.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: Vec<String>,
}

impl KeyRing {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ring = Self::default();
        for key in keys {
            ring.push(key);
        }
        ring
    }

    /// Add a candidate; empty and repeated passwords are ignored.
    pub fn push(&mut self, key: impl Into<String>) {
        let key = key.into();
        if key.is_empty() || self.keys.contains(&key) {
            return;
        }
        self.keys.push(key);
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn first(&self) -> Option<&str> {
        self.keys.first().map(String::as_str)
    }

    pub fn resolve(&self, stored_hash: &str) -> Result<&str, ArchiveError> {
        resolve_access(self.iter(), stored_hash)
    }
}
