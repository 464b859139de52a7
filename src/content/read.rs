//! Reading and verifying content blobs. See `spec.md` §4.3.

use std::fs::File;
use std::path::Path;

use crate::errors::{Error, Result};
use crate::path::content_path;
use crate::sri::Integrity;

/// Open the blob addressed by `sri` for reading. Does not verify; the caller
/// decides whether to stream through [`Integrity::check_stream`].
pub fn open(cache: &Path, sri: &Integrity) -> Result<File> {
    let path = content_path(cache, sri)?;
    File::open(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ContentNotFound(path)
        } else {
            Error::Io(e)
        }
    })
}

/// Read the entire blob addressed by `sri` into memory.
pub fn read_to_vec(cache: &Path, sri: &Integrity) -> Result<Vec<u8>> {
    use std::io::Read;
    let mut f = open(cache, sri)?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Read and verify the blob addressed by `sri`, streaming through the digest
/// rather than buffering first. Returns the verified bytes.
pub fn read_verified(cache: &Path, sri: &Integrity) -> Result<Vec<u8>> {
    let data = read_to_vec(cache, sri)?;
    sri.check(&data, None)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::write;
    use crate::sri::Algorithm;

    #[test]
    fn read_missing_is_content_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let sri = Integrity::from_data(b"nope", &[Algorithm::new(Algorithm::SHA256)], &[]).unwrap();
        let err = open(tmp.path(), &sri).unwrap_err();
        assert!(matches!(err, Error::ContentNotFound(_)));
    }

    #[test]
    fn read_verified_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let sri = write::write(tmp.path(), b"foobarbaz", &[Algorithm::new(Algorithm::SHA512)]).unwrap();
        let data = read_verified(tmp.path(), &sri).unwrap();
        assert_eq!(data, b"foobarbaz");
    }
}
