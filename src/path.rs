//! Deterministic mapping from cache key / content digest to on-disk paths.
//! See `spec.md` §3 (on-disk layout) and §4.2.

use std::path::{Path, PathBuf};

use sha2::Digest as _;

use crate::errors::Result;
use crate::sri::Integrity;

/// Content store directory version. Paths embed this (`spec.md` I6).
pub const CONTENT_VERSION: &str = "2";
/// Index store directory version. Paths embed this (`spec.md` I6).
pub const INDEX_VERSION: &str = "5";

/// `sha256(key)`, hex-encoded.
pub fn hash_key(key: &str) -> String {
    hex::encode(sha2::Sha256::digest(key.as_bytes()))
}

/// `sha1(json)`, hex-encoded. Used to self-hash bucket lines.
pub fn hash_entry(json: &str) -> String {
    use sha1::Digest as _;
    hex::encode(sha1::Sha1::digest(json.as_bytes()))
}

/// Split a hex string into the three path segments `[aa, bb, rest]` used for
/// sharding both content and index paths. Valid for any hex string of length
/// at least 4.
pub fn hash_to_segments(hex: &str) -> [&str; 3] {
    [&hex[0..2], &hex[2..4], &hex[4..]]
}

/// Path of the bucket file a key's index entries are appended to.
pub fn bucket_path(cache: &Path, key: &str) -> PathBuf {
    let hashed = hash_key(key);
    let [a, b, rest] = hash_to_segments(&hashed);
    cache.join(format!("index-v{INDEX_VERSION}")).join(a).join(b).join(rest)
}

/// Path of the content blob addressed by `integrity`'s best algorithm.
pub fn content_path(cache: &Path, integrity: &Integrity) -> Result<PathBuf> {
    let (algorithm, hex_digest) = integrity.to_hex()?;
    let [a, b, rest] = hash_to_segments(&hex_digest);
    Ok(cache
        .join(format!("content-v{CONTENT_VERSION}"))
        .join(algorithm.as_str())
        .join(a)
        .join(b)
        .join(rest))
}

/// Root of the temporary workspace area.
pub fn tmp_dir(cache: &Path) -> PathBuf {
    cache.join("tmp")
}

/// Path of the last-verified marker file.
pub fn verifile_path(cache: &Path) -> PathBuf {
    cache.join("_lastverified")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sri::Algorithm;

    #[test]
    fn content_path_matches_known_vector() {
        let sri = Integrity::from_data(b"hello world", &[Algorithm::new(Algorithm::SHA256)], &[]).unwrap();
        let cpath = content_path(Path::new("~/.my-cache"), &sri).unwrap();
        let mut wanted = PathBuf::new();
        wanted.push("~/.my-cache");
        wanted.push("content-v2");
        wanted.push("sha256");
        wanted.push("b9");
        wanted.push("4d");
        wanted.push("27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9");
        assert_eq!(cpath, wanted);
    }

    #[test]
    fn hash_to_segments_splits_correctly() {
        let segs = hash_to_segments("1234567890abcdef1234567890abcdef12345678");
        assert_eq!(segs, ["12", "34", "567890abcdef1234567890abcdef12345678"]);
    }
}
