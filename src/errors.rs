//! Error taxonomy for the cache. See `spec.md` §7.

use std::path::PathBuf;

/// Everything that can go wrong talking to the cache.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An SRI string named an algorithm this build can't hash with.
    #[error("no such hash algorithm: {0}")]
    NoSuchAlgorithm(String),

    /// Caller declared a size that didn't match the bytes actually written/read.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Size the caller asked for.
        expected: usize,
        /// Size actually observed.
        actual: usize,
    },

    /// Digest of the bytes didn't match any hash in the expected `Integrity`.
    #[error("integrity check failed: wanted {wanted}, computed {found}")]
    IntegrityMismatch {
        /// The integrity string the caller supplied.
        wanted: String,
        /// The integrity string computed from the actual bytes.
        found: String,
    },

    /// No live index entry for this key.
    #[error("no cache entry for key {0:?}")]
    EntryNotFound(String),

    /// No content file for this integrity.
    #[error("no content at {0:?}")]
    ContentNotFound(PathBuf),

    /// Caller passed inconsistent arguments before any I/O took place.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An SRI string could not be parsed at all where one was required.
    #[error("malformed integrity string: {0:?}")]
    BadIntegrity(String),

    /// Propagated filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Propagated (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
