//! Content-addressed blob storage. See `spec.md` §4.3.

pub mod read;
pub mod write;

use std::fs;
use std::path::Path;

use crate::errors::Result;
use crate::path::content_path;
use crate::sri::Integrity;

/// `{sri, size}` if the blob addressed by `sri` exists, `None` otherwise.
/// ENOENT and EPERM are both treated as "absent", per `spec.md` §4.3.
pub fn has_content(cache: &Path, sri: &Integrity) -> Result<Option<(Integrity, u64)>> {
    let path = content_path(cache, sri)?;
    match fs::symlink_metadata(&path) {
        Ok(meta) => Ok(Some((sri.clone(), meta.len()))),
        Err(e)
            if e.kind() == std::io::ErrorKind::NotFound
                || e.kind() == std::io::ErrorKind::PermissionDenied =>
        {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete the blob addressed by `sri`. Returns `false` if it was already
/// absent.
pub fn rm(cache: &Path, sri: &Integrity) -> Result<bool> {
    if has_content(cache, sri)?.is_none() {
        return Ok(false);
    }
    fs::remove_file(content_path(cache, sri)?)?;
    Ok(true)
}
