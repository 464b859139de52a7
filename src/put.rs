//! Writing content and its index entry together. See `spec.md` §4.3 step 1-3
//! and §6's `put`/`put_hash`.

use std::path::Path;

use serde_json::Value;

use crate::content;
use crate::errors::{Error, Result};
use crate::index::{self, InsertOpts};
use crate::sri::{Algorithm, Integrity};

/// Options for [`put`] and [`put_hash`].
#[derive(Clone, Default)]
pub struct PutOpts {
    size: Option<u64>,
    integrity: Option<Integrity>,
    algorithms: Vec<Algorithm>,
    metadata: Option<Value>,
    uid: Option<u32>,
    gid: Option<u32>,
    tmp_prefix: Option<String>,
}

impl PutOpts {
    /// An opts record with every field at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the write if `data.len()` doesn't match this.
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Verify the written bytes against this integrity before committing.
    pub fn integrity(mut self, integrity: Integrity) -> Self {
        self.integrity = Some(integrity);
        self
    }

    /// Add an algorithm to hash the content under (may be called more than
    /// once). Defaults to `sha512` alone if never called.
    pub fn algorithm(mut self, algo: Algorithm) -> Self {
        self.algorithms.push(algo);
        self
    }

    /// Metadata to attach to the index entry.
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Owning uid to chown created files/directories to, when running as root.
    /// No-op on targets without POSIX ownership (`spec.md` §5, out of scope
    /// per §1's external-collaborators list).
    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Owning gid, see [`PutOpts::uid`].
    pub fn gid(mut self, gid: u32) -> Self {
        self.gid = Some(gid);
        self
    }

    /// Prefix for the tmp file created while writing (defaults to `"put"`).
    pub fn tmp_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tmp_prefix = Some(prefix.into());
        self
    }
}

/// Write `data` under `key`, publishing content and an index entry for it.
#[tracing::instrument(level = "debug", skip_all, fields(key = %key, bytes = data.len()))]
pub fn put(cache: &Path, key: &str, data: &[u8], opts: PutOpts) -> Result<Integrity> {
    let sri = write_verified(cache, data, &opts)?;
    index::insert(
        cache,
        key,
        InsertOpts {
            integrity: Some(sri.clone()),
            size: Some(data.len() as u64),
            metadata: opts.metadata,
            time: None,
        },
    )?;
    tracing::debug!(integrity = %sri, "put committed");
    Ok(sri)
}

/// Write `data` to the content store only, without an index entry.
#[tracing::instrument(level = "debug", skip_all, fields(bytes = data.len()))]
pub fn put_hash(cache: &Path, data: &[u8], opts: PutOpts) -> Result<Integrity> {
    write_verified(cache, data, &opts)
}

fn write_verified(cache: &Path, data: &[u8], opts: &PutOpts) -> Result<Integrity> {
    if let Some(size) = opts.size {
        if data.len() as u64 != size {
            return Err(Error::InvalidArgument(format!(
                "put size mismatch: expected {size} bytes, got {}",
                data.len()
            )));
        }
    }
    if let Some(wanted) = &opts.integrity {
        wanted.check(data, None)?;
    }
    content::write::write(cache, data, &opts.algorithms)
}
