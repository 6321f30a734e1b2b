//! Error taxonomy shared by the fetch, decrypt and window layers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    /// None of the candidate passwords fingerprints to the stored hash.
    #[error("no matching key for {scope}")]
    NoMatchingKey { scope: String },

    /// Wrong key or corrupted ciphertext.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Decrypted fine, but the plaintext is not the expected JSON document.
    #[error("malformed document {path}: {source}")]
    MalformedChunk {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Missing resource, or a jump target outside the loaded chunk.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport or I/O failure other than a missing resource.
    #[error("failed to read {path}: {message}")]
    Source { path: String, message: String },
}

/// Coarse classification of an [`ArchiveError`], kept in view state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoMatchingKey,
    Decryption,
    MalformedChunk,
    NotFound,
    Source,
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::NoMatchingKey { .. } => ErrorKind::NoMatchingKey,
            ArchiveError::Decryption(_) => ErrorKind::Decryption,
            ArchiveError::MalformedChunk { .. } => ErrorKind::MalformedChunk,
            ArchiveError::NotFound(_) => ErrorKind::NotFound,
            ArchiveError::Source { .. } => ErrorKind::Source,
        }
    }

    /// Short message suitable for an inline error line.
    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NoMatchingKey => "None of the supplied keys unlocks this.",
            ErrorKind::Decryption => "Could not decrypt; the key is probably wrong.",
            ErrorKind::MalformedChunk => "The decrypted data is not a valid archive document.",
            ErrorKind::NotFound => "Not found.",
            ErrorKind::Source => "Error loading messages. Please try again.",
        }
    }
}
