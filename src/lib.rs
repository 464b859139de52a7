//! `cafs`: a content-addressable filesystem cache wire-compatible with the
//! npm `cacache` on-disk layout.
//!
//! The cache root holds two durable subsystems: a content-addressed blob
//! store (`content-v2/`) keyed by Subresource Integrity digest, and an
//! append-only, hash-sharded index (`index-v5/`) mapping arbitrary string
//! keys to the latest entry describing them. [`put`] writes both; [`get`]
//! reads through the index to the content; [`verify`] sweeps both to drop
//! garbage and repair stale index lines.
//!
//! No internal locking or async runtime is used. Concurrent access across
//! processes is safe by construction: content is addressed by the hash of
//! its own bytes, and index lines are self-hashed and append-only, so a
//! reader can never observe a torn write as valid data (`spec.md` §5).

mod content;
mod errors;
mod get;
mod index;
mod path;
mod put;
mod sri;
mod tmp;
mod verify;

use std::fs;
use std::path::Path;

pub use errors::{Error, Result};
pub use get::{get, get_by_digest, get_info, GetOpts, GetOutput};
pub use index::{Entry, InsertOpts, RemoveOpts};
pub use put::{put, put_hash, PutOpts};
pub use sri::{Algorithm, Hash, Integrity, IntegrityOpts, ParseOptions};
pub use verify::{verify, verify_last_run, VerificationStats, VerifyOpts};

/// The on-disk format versions this crate reads and writes. Paths embed
/// these (`spec.md` I6); bumping either is a breaking change to the
/// on-disk layout, not just to this crate's API.
pub struct CacheVersion {
    pub content: u8,
    pub index: u8,
}

/// Compile-time constant pair `{content: 2, index: 5}` (`spec.md` I6).
pub const CACHE_VERSION: CacheVersion = CacheVersion { content: 2, index: 5 };

/// `true` if `integrity`'s blob exists in `cache`, alongside its size.
pub fn has_content(cache: &Path, integrity: &Integrity) -> Result<Option<(Integrity, u64)>> {
    content::has_content(cache, integrity)
}

/// Delete the blob addressed by `integrity`. Returns `false` if it was
/// already absent. The index is left untouched; dangling entries are
/// cleaned up by [`verify`].
pub fn rm_content(cache: &Path, integrity: &Integrity) -> Result<bool> {
    content::rm(cache, integrity)
}

/// Append a tombstone for `key`, or (with [`RemoveOpts::remove_fully`])
/// also delete its bucket file and referenced content outright.
pub fn rm_entry(cache: &Path, key: &str, opts: RemoveOpts) -> Result<()> {
    index::remove(cache, key, opts)
}

/// Recursively delete every `content-*`/`index-*` directory under `cache`,
/// wiping the entire cache's content and index state. `tmp/` and
/// `_lastverified` are left alone.
pub fn rm_all(cache: &Path) -> Result<()> {
    for entry in fs::read_dir(cache)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !entry.path().is_dir() {
            continue;
        }
        if name.starts_with("content-") || name.starts_with("index-") {
            fs::remove_dir_all(entry.path())?;
        }
    }
    Ok(())
}

/// Collect every live key's latest entry.
pub fn ls(cache: &Path) -> Result<std::collections::HashMap<String, Entry>> {
    index::ls(cache)
}

/// Stream every live key's latest entry, bucket file by bucket file.
pub fn ls_iter(cache: &Path) -> impl Iterator<Item = Result<Entry>> {
    index::ls_iter(cache)
}
