//! Temporary workspace allocation under `{cache}/tmp`. See `spec.md` §3, §5.

use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::errors::Result;
use crate::path::tmp_dir;

/// A just-created, empty tmp file under `{cache}/tmp`. Dropping this without
/// committing it elsewhere leaves a stray file; callers that move/link the
/// path into its final destination are expected to `unlink` or rename it away,
/// matching `spec.md` §4.3 step 5's "create tmp ... then unlink(tmp)".
pub struct TmpFile {
    /// Path of the allocated (but not yet populated) tmp file.
    pub path: PathBuf,
}

/// Create a uniquely-named tmp file under `{cache}/tmp`, ensuring the tmp
/// directory exists first. `prefix` becomes the `<prefix>-<slug>` name.
pub fn create(cache: &Path, prefix: &str) -> Result<TmpFile> {
    let dir = tmp_dir(cache);
    fs::create_dir_all(&dir)?;
    loop {
        let slug = random_slug();
        let path = dir.join(format!("{prefix}-{slug}"));
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok(TmpFile { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Remove `{cache}/tmp` recursively, tolerating a missing directory.
pub fn clean(cache: &Path) -> Result<()> {
    let dir = tmp_dir(cache);
    match fs::remove_dir_all(&dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn random_slug() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 4] = rng.gen();
    hex::encode(bytes)
}
