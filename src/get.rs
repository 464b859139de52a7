//! Reading content and index entries back out. See `spec.md` §6.

use std::path::Path;

use serde_json::Value;

use crate::content;
use crate::errors::{Error, Result};
use crate::index::{self, Entry};
use crate::sri::Integrity;

/// Options for [`get`] and [`get_by_digest`].
#[derive(Clone, Copy, Debug)]
pub struct GetOpts {
    /// Verify the read bytes against the entry's integrity before returning
    /// them. Defaults to `true`.
    pub verify: bool,
}

impl Default for GetOpts {
    fn default() -> Self {
        GetOpts { verify: true }
    }
}

/// The result of a successful [`get`].
#[derive(Clone, Debug)]
pub struct GetOutput {
    /// The blob's bytes.
    pub data: Vec<u8>,
    /// Integrity the entry recorded for this blob.
    pub integrity: Integrity,
    /// Size in bytes, from the index entry if recorded, else `data.len()`.
    pub size: u64,
    /// Arbitrary caller-supplied metadata attached at `put` time.
    pub metadata: Value,
}

/// Look up `key`'s latest live entry and read its content.
#[tracing::instrument(level = "debug", skip_all, fields(key = %key))]
pub fn get(cache: &Path, key: &str, opts: GetOpts) -> Result<GetOutput> {
    let entry = index::find(cache, key)?.ok_or_else(|| Error::EntryNotFound(key.to_string()))?;
    let data = if opts.verify {
        content::read::read_verified(cache, &entry.integrity)?
    } else {
        content::read::read_to_vec(cache, &entry.integrity)?
    };
    let size = entry.size.unwrap_or(data.len() as u64);
    Ok(GetOutput {
        data,
        integrity: entry.integrity,
        size,
        metadata: entry.metadata,
    })
}

/// Read content directly by its integrity, bypassing the index.
pub fn get_by_digest(cache: &Path, integrity: &Integrity, opts: GetOpts) -> Result<Vec<u8>> {
    if opts.verify {
        content::read::read_verified(cache, integrity)
    } else {
        content::read::read_to_vec(cache, integrity)
    }
}

/// Look up `key`'s latest live entry without reading its content.
pub fn get_info(cache: &Path, key: &str) -> Result<Option<Entry>> {
    index::find(cache, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::put::{put, PutOpts};

    #[test]
    fn get_missing_key_is_entry_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = get(tmp.path(), "nope", GetOpts::default()).unwrap_err();
        assert!(matches!(err, Error::EntryNotFound(_)));
    }

    #[test]
    fn get_by_digest_matches_put() {
        let tmp = tempfile::tempdir().unwrap();
        let sri = put(tmp.path(), "k", b"hello world", PutOpts::new()).unwrap();
        let data = get_by_digest(tmp.path(), &sri, GetOpts::default()).unwrap();
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn get_info_returns_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        put(
            tmp.path(),
            "k",
            b"hello",
            PutOpts::new().metadata(serde_json::json!({"name": "hello"})),
        )
        .unwrap();
        let entry = get_info(tmp.path(), "k").unwrap().unwrap();
        assert_eq!(entry.metadata, serde_json::json!({"name": "hello"}));
    }
}
