//! The verify/GC pipeline: garbage-collects unreferenced or corrupt content,
//! rewrites index buckets to drop stale lines, and cleans the tmp area.
//! See `spec.md` §4.5.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use walkdir::WalkDir;

use crate::errors::Result;
use crate::index::{self, Entry};
use crate::path::{self, CONTENT_VERSION};
use crate::sri::{Algorithm, Integrity};
use crate::tmp;

/// Options controlling a [`verify`] run.
#[derive(Default)]
pub struct VerifyOpts {
    /// When set, only entries passing `filter` survive `rebuild_index`;
    /// everything else is rejected (but its content is left alone unless
    /// GC already reclaimed it as unreferenced).
    pub filter: Option<Box<dyn Fn(&Entry) -> bool>>,
    /// Owning uid for fixed-up paths; no-op on non-POSIX targets (`spec.md`
    /// §5, listed as an external collaborator in §1, not implemented here).
    pub uid: Option<u32>,
    /// Owning gid, see [`VerifyOpts::uid`].
    pub gid: Option<u32>,
}

/// Stats accumulated across one [`verify`] run.
#[derive(Debug, Default, Clone)]
pub struct VerificationStats {
    pub verified_content: u64,
    pub reclaimed_count: u64,
    pub reclaimed_size: u64,
    pub bad_content_count: u64,
    pub kept_size: u64,
    pub missing_content: u64,
    pub rejected_entries: u64,
    pub total_entries: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub run_time: HashMap<&'static str, Duration>,
}

/// Run every verify phase in sequence against `cache`.
pub fn verify(cache: &Path, opts: VerifyOpts) -> Result<VerificationStats> {
    let total_start = Instant::now();
    let mut stats = VerificationStats {
        start_time: now_secs(),
        ..Default::default()
    };

    let t = Instant::now();
    fix_permissions(cache)?;
    stats.run_time.insert("fix_permissions", t.elapsed());

    let t = Instant::now();
    garbage_collect(cache, &opts, &mut stats)?;
    stats.run_time.insert("garbage_collect", t.elapsed());

    let t = Instant::now();
    rebuild_index(cache, &opts, &mut stats)?;
    stats.run_time.insert("rebuild_index", t.elapsed());

    let t = Instant::now();
    tmp::clean(cache)?;
    stats.run_time.insert("clean_tmp", t.elapsed());

    let t = Instant::now();
    write_verifile(cache)?;
    stats.run_time.insert("write_verifile", t.elapsed());

    stats.end_time = now_secs();
    stats.run_time.insert("total", total_start.elapsed());
    tracing::info!(
        verified = stats.verified_content,
        reclaimed = stats.reclaimed_count,
        bad = stats.bad_content_count,
        "verify complete"
    );
    Ok(stats)
}

/// Read `_lastverified`, if present.
pub fn verify_last_run(cache: &Path) -> Result<Option<u64>> {
    let path = path::verifile_path(cache);
    match fs::read_to_string(&path) {
        Ok(s) => Ok(s.trim().parse().ok()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn fix_permissions(cache: &Path) -> Result<()> {
    fs::create_dir_all(cache)?;
    Ok(())
}

fn garbage_collect(cache: &Path, opts: &VerifyOpts, stats: &mut VerificationStats) -> Result<()> {
    let live: std::collections::HashSet<String> = index::ls(cache)?
        .into_values()
        .filter(|entry| opts.filter.as_ref().map(|f| f(entry)).unwrap_or(true))
        .map(|entry| entry.integrity.to_string())
        .collect();

    let content_root = cache.join(format!("content-v{CONTENT_VERSION}"));
    for walked in WalkDir::new(&content_root).min_depth(4).max_depth(4) {
        let walked = match walked {
            Ok(w) => w,
            Err(e) => {
                if e.io_error().map(|io| io.kind() == std::io::ErrorKind::NotFound).unwrap_or(false) {
                    continue;
                }
                return Err(crate::errors::Error::Io(std::io::Error::other(e.to_string())));
            }
        };
        if !walked.file_type().is_file() {
            continue;
        }
        let rel = match walked.path().strip_prefix(&content_root) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let segments: Vec<&str> = rel.components().filter_map(|c| c.as_os_str().to_str()).collect();
        let [algorithm, a, b, rest] = match segments.as_slice() {
            [algo, a, b, rest] => [*algo, *a, *b, *rest],
            _ => continue,
        };
        let hex_digest = format!("{a}{b}{rest}");
        let integrity = match Integrity::from_hex(&hex_digest, Algorithm::new(algorithm), &[]) {
            Ok(i) => i,
            Err(_) => continue,
        };

        let meta = match fs::symlink_metadata(walked.path()) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        let size = meta.len();

        if live.contains(&integrity.to_string()) {
            match verify_content(cache, &integrity) {
                Ok(true) => {
                    stats.verified_content += 1;
                    stats.kept_size += size;
                }
                Ok(false) | Err(_) => {
                    let _ = fs::remove_file(walked.path());
                    stats.bad_content_count += 1;
                    stats.reclaimed_count += 1;
                    stats.reclaimed_size += size;
                }
            }
        } else {
            let _ = fs::remove_file(walked.path());
            stats.reclaimed_count += 1;
            stats.reclaimed_size += size;
        }
    }
    Ok(())
}

/// Stream-verify one content file against its own addressed integrity. A
/// missing file mid-sweep (raced delete) counts as invalid rather than erroring.
fn verify_content(cache: &Path, integrity: &Integrity) -> Result<bool> {
    let file = match crate::content::read::open(cache, integrity) {
        Ok(f) => f,
        Err(crate::errors::Error::ContentNotFound(_)) => return Ok(false),
        Err(e) => return Err(e),
    };
    Ok(integrity.check_stream(file, None).is_ok())
}

fn rebuild_index(cache: &Path, opts: &VerifyOpts, stats: &mut VerificationStats) -> Result<()> {
    let entries = index::ls(cache)?;
    let mut buckets: HashMap<std::path::PathBuf, Vec<Entry>> = HashMap::new();
    for entry in entries.into_values() {
        let bucket = path::bucket_path(cache, &entry.key);
        buckets.entry(bucket).or_default().push(entry);
    }

    for (bucket, group) in buckets {
        if let Some(parent) = bucket.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::OpenOptions::new().write(true).truncate(true).create(true).open(&bucket)?;

        for entry in group {
            if let Some(filter) = &opts.filter {
                if !filter(&entry) {
                    stats.rejected_entries += 1;
                    continue;
                }
            }
            let content_path = path::content_path(cache, &entry.integrity)?;
            match fs::metadata(&content_path) {
                Ok(meta) => {
                    index::insert(
                        cache,
                        &entry.key,
                        index::InsertOpts {
                            integrity: Some(entry.integrity.clone()),
                            size: Some(meta.len()),
                            metadata: Some(entry.metadata.clone()),
                            time: Some(entry.time),
                        },
                    )?;
                    stats.total_entries += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    stats.missing_content += 1;
                    stats.rejected_entries += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

fn write_verifile(cache: &Path) -> Result<()> {
    let path = path::verifile_path(cache);
    fs::write(path, now_secs().to_string())?;
    Ok(())
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
