//! Atomic content writes: tmp file, hash while streaming, then publish via
//! hardlink-or-rename. See `spec.md` §4.3 steps 4-5.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::errors::{Error, Result};
use crate::path::content_path;
use crate::sri::{Algorithm, IntegrityOpts, Integrity};
use crate::tmp;

/// A content write in progress. Bytes are hashed as they're written to a tmp
/// file; nothing is visible under `content-v2` until [`Writer::close`] is
/// called.
pub struct Writer {
    cache: PathBuf,
    tmp_path: PathBuf,
    file: File,
    hasher: IntegrityOpts,
    written: usize,
}

impl Writer {
    /// Open a new tmp file under `{cache}/tmp` ready to receive bytes hashed
    /// under each of `algorithms` (defaults to `sha512` if empty).
    pub fn new(cache: &Path, algorithms: &[Algorithm]) -> Result<Self> {
        let tmp_file = tmp::create(cache, "content")?;
        let file = fs::OpenOptions::new().write(true).open(&tmp_file.path)?;
        let mut hasher = IntegrityOpts::new();
        for algo in algorithms {
            hasher = hasher.algorithm(algo.clone());
        }
        Ok(Writer {
            cache: cache.to_path_buf(),
            tmp_path: tmp_file.path,
            file,
            hasher,
            written: 0,
        })
    }

    /// Total bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Finish writing, publish the content at its addressed path, and return
    /// the integrity computed from the bytes actually written.
    pub fn close(self) -> Result<Integrity> {
        self.file.sync_all()?;
        let sri = self.hasher.result();
        move_to_destination(&self.cache, &self.tmp_path, &sri)?;
        Ok(sri)
    }
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.input(&buf[..n]);
        self.written += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Write `data` in one shot under `cache`, hashed with `algorithms`.
pub fn write(cache: &Path, data: &[u8], algorithms: &[Algorithm]) -> Result<Integrity> {
    let mut w = Writer::new(cache, algorithms)?;
    w.write_all(data)?;
    w.close()
}

/// Publish a populated tmp file at the content path addressed by `sri`.
/// Link races (another writer already committed byte-identical content) are
/// not errors, since content-addressing guarantees the bytes are the same.
fn move_to_destination(cache: &Path, tmp_path: &Path, sri: &Integrity) -> Result<()> {
    let dest = content_path(cache, sri)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::hard_link(tmp_path, &dest) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) if is_busy(&e) => {}
        Err(e) if is_cross_device(&e) => {
            // Cross-device link: publish via atomic rename instead.
            match fs::rename(tmp_path, &dest) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Err(e) => return Err(Error::Io(e)),
    }

    let _ = fs::remove_file(tmp_path);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(&dest, fs::Permissions::from_mode(0o444));
    }

    Ok(())
}

fn is_busy(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc_ebusy())
}

#[cfg(unix)]
fn libc_ebusy() -> i32 {
    16 // EBUSY on Linux; hardlink collisions across filesystems surface as this or EEXIST.
}

#[cfg(not(unix))]
fn libc_ebusy() -> i32 {
    -1
}

#[cfg(unix)]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(18) // EXDEV
}

#[cfg(not(unix))]
fn is_cross_device(_e: &io::Error) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sri::Algorithm;

    #[test]
    fn write_then_publish() {
        let tmp = tempfile::tempdir().unwrap();
        let sri = write(tmp.path(), b"foobarbaz", &[Algorithm::new(Algorithm::SHA512)]).unwrap();
        let path = content_path(tmp.path(), &sri).unwrap();
        assert!(path.exists());
        assert_eq!(fs::read(&path).unwrap(), b"foobarbaz");
    }

    #[test]
    fn write_empty_bytes_publishes_sha512_of_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let sri = write(tmp.path(), b"", &[]).unwrap();
        let path = content_path(tmp.path(), &sri).unwrap();
        assert!(path.exists());
        assert_eq!(fs::read(&path).unwrap(), b"");
        let expected = Integrity::from_data(b"", &[], &[]).unwrap();
        assert_eq!(sri, expected);
    }

    #[test]
    fn concurrent_identical_write_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let sri1 = write(tmp.path(), b"same bytes", &[Algorithm::new(Algorithm::SHA256)]).unwrap();
        let sri2 = write(tmp.path(), b"same bytes", &[Algorithm::new(Algorithm::SHA256)]).unwrap();
        assert_eq!(sri1, sri2);
        let path = content_path(tmp.path(), &sri1).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"same bytes");
    }
}
