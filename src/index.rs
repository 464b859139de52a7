//! The append-only, hash-sharded index log. See `spec.md` §4.4.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use walkdir::WalkDir;

use crate::errors::{Error, Result};
use crate::path::{bucket_path, hash_entry, INDEX_VERSION};
use crate::sri::Integrity;

/// A live (non-tombstone) index entry, as returned to callers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Key this entry is stored under.
    pub key: String,
    /// Integrity of the content this entry points at.
    pub integrity: Integrity,
    /// Unix-seconds timestamp this entry was written.
    pub time: u64,
    /// Size in bytes of the associated content, if known.
    pub size: Option<u64>,
    /// Arbitrary caller-supplied metadata.
    pub metadata: Value,
}

impl Entry {
    /// The on-disk path of this entry's content, under `cache`.
    pub fn content_path(&self, cache: &Path) -> Result<std::path::PathBuf> {
        crate::path::content_path(cache, &self.integrity)
    }
}

/// The on-disk shape of one bucket line. `integrity: None` is a tombstone.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawEntry {
    key: String,
    integrity: Option<String>,
    time: u64,
    size: Option<u64>,
    metadata: Value,
}

/// Options for [`insert`]. `integrity: None` writes a tombstone.
#[derive(Clone, Default)]
pub struct InsertOpts {
    /// Integrity to record; `None` tombstones the key.
    pub integrity: Option<Integrity>,
    /// Size in bytes of the associated content.
    pub size: Option<u64>,
    /// Arbitrary caller-supplied metadata.
    pub metadata: Option<Value>,
    /// Override the recorded timestamp (tests mostly; defaults to now).
    pub time: Option<u64>,
}

/// Append one entry line to `key`'s bucket, creating the bucket (and its
/// parent shard directories) if needed.
pub fn insert(cache: &Path, key: &str, opts: InsertOpts) -> Result<()> {
    let bucket = bucket_path(cache, key);
    if let Some(parent) = bucket.parent() {
        fs::create_dir_all(parent)?;
    }
    let raw = RawEntry {
        key: key.to_string(),
        integrity: opts.integrity.map(|i| i.to_string()),
        time: opts.time.unwrap_or_else(now_secs),
        size: opts.size,
        metadata: opts.metadata.unwrap_or(Value::Null),
    };
    let json = serde_json::to_string(&raw)?;
    let line = format!("{}\t{}\n", hash_entry(&json), json);

    let mut f = OpenOptions::new().create(true).append(true).open(&bucket)?;
    f.write_all(line.as_bytes())?;
    f.flush()?;
    Ok(())
}

/// Append a tombstone for `key`. The associated content is left untouched.
pub fn delete(cache: &Path, key: &str) -> Result<()> {
    insert(cache, key, InsertOpts::default())
}

/// Options for [`remove`].
#[derive(Clone, Copy, Default)]
pub struct RemoveOpts {
    /// If `true`, also unlink the referenced content and delete the bucket
    /// file outright, instead of appending a tombstone line.
    pub remove_fully: bool,
}

/// Remove `key`'s index entry, per `opts`.
pub fn remove(cache: &Path, key: &str, opts: RemoveOpts) -> Result<()> {
    if !opts.remove_fully {
        return delete(cache, key);
    }
    if let Some(entry) = find(cache, key)? {
        let _ = crate::content::rm(cache, &entry.integrity);
    }
    let bucket = bucket_path(cache, key);
    match fs::remove_file(&bucket) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Find the latest live entry for `key`, scanning its bucket in reverse.
/// Returns `None` if the bucket has no entry for `key`, or the latest one
/// is a tombstone.
pub fn find(cache: &Path, key: &str) -> Result<Option<Entry>> {
    let bucket = bucket_path(cache, key);
    let entries = bucket_entries(&bucket)?;
    for raw in entries.into_iter().rev() {
        if raw.key == key {
            return Ok(format_entry(raw));
        }
    }
    Ok(None)
}

/// Collect every live key's latest entry across the whole index.
pub fn ls(cache: &Path) -> Result<HashMap<String, Entry>> {
    let mut acc = HashMap::new();
    for res in ls_iter(cache) {
        let entry = res?;
        acc.insert(entry.key.clone(), entry);
    }
    Ok(acc)
}

/// Stream every live key's latest entry across the whole index, bucket file
/// by bucket file.
pub fn ls_iter(cache: &Path) -> impl Iterator<Item = Result<Entry>> {
    let index_root = cache.join(format!("index-v{INDEX_VERSION}"));
    let mut out = Vec::new();

    for walked in WalkDir::new(&index_root).max_depth(3).into_iter() {
        let walked = match walked {
            Ok(w) => w,
            Err(e) => {
                let not_found = e
                    .io_error()
                    .map(|io| io.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false);
                if not_found {
                    continue;
                }
                out.push(Err(Error::Io(std::io::Error::other(e.to_string()))));
                continue;
            }
        };
        if walked.file_type().is_dir() {
            continue;
        }
        match bucket_entries(walked.path()) {
            Ok(raws) => {
                let mut last_per_key: HashMap<String, RawEntry> = HashMap::new();
                for raw in raws {
                    last_per_key.insert(raw.key.clone(), raw);
                }
                for (_, raw) in last_per_key {
                    if let Some(entry) = format_entry(raw) {
                        out.push(Ok(entry));
                    }
                }
            }
            Err(e) => out.push(Err(e)),
        }
    }

    out.into_iter()
}

fn format_entry(raw: RawEntry) -> Option<Entry> {
    let integrity_str = raw.integrity?;
    let integrity: Integrity = integrity_str.parse().ok()?;
    Some(Entry {
        key: raw.key,
        integrity,
        time: raw.time,
        size: raw.size,
        metadata: raw.metadata,
    })
}

/// Read every syntactically-valid line of a bucket file. A line whose
/// self-hash doesn't match its JSON, or whose JSON doesn't parse, is dropped
/// silently rather than aborting the whole read (`spec.md` I2/I4, §7).
fn bucket_entries(bucket: &Path) -> Result<Vec<RawEntry>> {
    let contents = match fs::read_to_string(bucket) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(contents
        .lines()
        .filter_map(|line| {
            let (hash, json) = line.split_once('\t')?;
            if hash_entry(json) != hash {
                return None;
            }
            serde_json::from_str::<RawEntry>(json).ok()
        })
        .collect())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sri::Algorithm;

    fn sri() -> Integrity {
        Integrity::from_data(b"hello", &[Algorithm::new(Algorithm::SHA256)], &[]).unwrap()
    }

    #[test]
    fn insert_then_find() {
        let tmp = tempfile::tempdir().unwrap();
        insert(
            tmp.path(),
            "hello",
            InsertOpts {
                integrity: Some(sri()),
                time: Some(1_234_567),
                ..Default::default()
            },
        )
        .unwrap();
        let entry = find(tmp.path(), "hello").unwrap().unwrap();
        assert_eq!(entry.key, "hello");
        assert_eq!(entry.integrity, sri());
        assert_eq!(entry.time, 1_234_567);
    }

    #[test]
    fn find_none_when_absent() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(find(tmp.path(), "nope").unwrap(), None);
    }

    #[test]
    fn last_write_wins() {
        let tmp = tempfile::tempdir().unwrap();
        insert(
            tmp.path(),
            "k",
            InsertOpts {
                integrity: Some(sri()),
                metadata: Some(serde_json::json!("m1")),
                ..Default::default()
            },
        )
        .unwrap();
        insert(
            tmp.path(),
            "k",
            InsertOpts {
                integrity: Some(sri()),
                metadata: Some(serde_json::json!("m2")),
                ..Default::default()
            },
        )
        .unwrap();
        let entry = find(tmp.path(), "k").unwrap().unwrap();
        assert_eq!(entry.metadata, serde_json::json!("m2"));
    }

    #[test]
    fn delete_tombstones() {
        let tmp = tempfile::tempdir().unwrap();
        insert(
            tmp.path(),
            "k",
            InsertOpts {
                integrity: Some(sri()),
                ..Default::default()
            },
        )
        .unwrap();
        delete(tmp.path(), "k").unwrap();
        assert_eq!(find(tmp.path(), "k").unwrap(), None);
    }

    #[test]
    fn ls_collects_every_key() {
        let tmp = tempfile::tempdir().unwrap();
        insert(
            tmp.path(),
            "hello",
            InsertOpts {
                integrity: Some(sri()),
                ..Default::default()
            },
        )
        .unwrap();
        insert(
            tmp.path(),
            "world",
            InsertOpts {
                integrity: Some(sri()),
                ..Default::default()
            },
        )
        .unwrap();
        let mut keys: Vec<_> = ls(tmp.path()).unwrap().into_keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn ls_excludes_tombstoned_keys() {
        let tmp = tempfile::tempdir().unwrap();
        insert(
            tmp.path(),
            "hello",
            InsertOpts {
                integrity: Some(sri()),
                ..Default::default()
            },
        )
        .unwrap();
        insert(
            tmp.path(),
            "world",
            InsertOpts {
                integrity: Some(sri()),
                ..Default::default()
            },
        )
        .unwrap();
        delete(tmp.path(), "hello").unwrap();
        let keys: Vec<_> = ls(tmp.path()).unwrap().into_keys().collect();
        assert_eq!(keys, vec!["world".to_string()]);
    }

    #[test]
    fn bucket_robust_to_garbage_trailer() {
        let tmp = tempfile::tempdir().unwrap();
        insert(
            tmp.path(),
            "k",
            InsertOpts {
                integrity: Some(sri()),
                ..Default::default()
            },
        )
        .unwrap();
        let bucket = bucket_path(tmp.path(), "k");
        let mut f = OpenOptions::new().append(true).open(&bucket).unwrap();
        f.write_all(b"234uhhh\n").unwrap();
        let entry = find(tmp.path(), "k").unwrap().unwrap();
        assert_eq!(entry.key, "k");
        assert_eq!(ls(tmp.path()).unwrap().len(), 1);
    }

    #[test]
    fn remove_fully_deletes_content_and_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        let sri = crate::content::write::write(tmp.path(), b"hello", &[Algorithm::new(Algorithm::SHA256)]).unwrap();
        insert(
            tmp.path(),
            "hello",
            InsertOpts {
                integrity: Some(sri.clone()),
                ..Default::default()
            },
        )
        .unwrap();
        remove(tmp.path(), "hello", RemoveOpts { remove_fully: true }).unwrap();
        assert_eq!(find(tmp.path(), "hello").unwrap(), None);
        assert!(crate::content::has_content(tmp.path(), &sri).unwrap().is_none());
    }
}
