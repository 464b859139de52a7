//! Quantified invariants, P1-P7.

use cafs::{get, has_content, put, rm_entry, verify, Algorithm, GetOpts, Integrity, ParseOptions, PutOpts, RemoveOpts, VerifyOpts};
use proptest::prelude::*;

fn cache() -> tempfile::TempDir {
    tempfile::tempdir().unwrap()
}

proptest! {
    /// P1: put then get round-trips bytes and integrity.
    #[test]
    fn put_get_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let tmp = cache();
        let sri = put(tmp.path(), "k", &bytes, PutOpts::new()).unwrap();
        let out = get(tmp.path(), "k", GetOpts::default()).unwrap();
        prop_assert_eq!(&out.data, &bytes);
        prop_assert_eq!(out.integrity, sri.clone());

        let expected = Integrity::from_data(&bytes, &[], &[]).unwrap();
        prop_assert_eq!(sri, expected);
    }

    /// P2: committed content hashes to the digest embedded in its own path.
    #[test]
    fn content_hashes_to_its_own_path(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let tmp = cache();
        let sri = cafs::put_hash(tmp.path(), &bytes, PutOpts::new()).unwrap();
        let (algo, hex_digest) = sri.to_hex().unwrap();
        let path = tmp.path().join("content-v2").join(algo.as_str())
            .join(&hex_digest[0..2]).join(&hex_digest[2..4]).join(&hex_digest[4..]);
        let on_disk = std::fs::read(&path).unwrap();
        prop_assert!(sri.matches(&on_disk));
    }

    /// P3: last writer wins on a single key across a sequence of puts.
    #[test]
    fn last_writer_wins(values in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..64), 1..8)) {
        let tmp = cache();
        for v in &values {
            put(tmp.path(), "k", v, PutOpts::new()).unwrap();
        }
        let out = get(tmp.path(), "k", GetOpts::default()).unwrap();
        prop_assert_eq!(&out.data, values.last().unwrap());
    }

    /// P4: rm_entry tombstones the key but leaves referenced content intact.
    #[test]
    fn tombstone_does_not_remove_content(bytes in proptest::collection::vec(any::<u8>(), 0..1024)) {
        let tmp = cache();
        let sri = put(tmp.path(), "k", &bytes, PutOpts::new()).unwrap();
        rm_entry(tmp.path(), "k", RemoveOpts::default()).unwrap();

        prop_assert!(get(tmp.path(), "k", GetOpts::default()).is_err());
        prop_assert!(has_content(tmp.path(), &sri).unwrap().is_some());
    }

    /// P6: garbage appended to a bucket doesn't perturb ls/get_info.
    #[test]
    fn bucket_robust_to_garbage(garbage in ".*") {
        let tmp = cache();
        put(tmp.path(), "k", b"stable content", PutOpts::new()).unwrap();
        let before = cafs::get_info(tmp.path(), "k").unwrap();

        use sha2::Digest as _;
        let hashed = hex::encode(sha2::Sha256::digest(b"k"));
        let bucket = tmp.path().join("index-v5").join(&hashed[0..2]).join(&hashed[2..4]).join(&hashed[4..]);
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new().append(true).open(&bucket).unwrap();
        let _ = write!(f, "\n{garbage}");

        let after = cafs::get_info(tmp.path(), "k").unwrap();
        prop_assert_eq!(before, after);
    }

    /// P7: SRI round-trips through its own string form.
    #[test]
    fn sri_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let i = Integrity::from_data(&bytes, &[Algorithm::new("sha256"), Algorithm::new("sha512")], &[]).unwrap();
        let s = i.to_string();
        let reparsed = Integrity::parse(&s, ParseOptions::default());
        prop_assert_eq!(reparsed, i);
    }
}

/// P5: verify is idempotent modulo timestamps.
#[test]
fn verify_is_idempotent() {
    let tmp = cache();
    put(tmp.path(), "k", b"stable bytes for verify", PutOpts::new()).unwrap();

    let first = verify(tmp.path(), VerifyOpts::default()).unwrap();
    let second = verify(tmp.path(), VerifyOpts::default()).unwrap();

    assert_eq!(first.verified_content, second.verified_content);
    assert_eq!(first.kept_size, second.kept_size);
    assert_eq!(second.reclaimed_count, 0);
    assert_eq!(second.missing_content, 0);
}
