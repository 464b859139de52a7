//! Subresource Integrity: parsing, canonicalization, and verification of
//! `algorithm-base64digest[?opt[?opt...]]` strings. See `spec.md` §4.1.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use base64::Engine;
use sha2::Digest as _;

use crate::errors::{Error, Result};

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Default algorithm priority used by [`Integrity::pick_algorithm`].
/// Higher index wins; unlisted algorithms score below every listed one.
const PRIORITY: &[&str] = &["md5", "whirlpool", "sha1", "sha224", "sha256", "sha384", "sha512"];

/// A hash algorithm name. Known algorithms get a fast path for hashing and
/// scoring; anything else is retained verbatim (non-strict parsing must not
/// drop unrecognized algorithms).
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Algorithm(String);

impl Algorithm {
    /// Construct from a free-form identifier, lower-cased for comparison.
    pub fn new(name: impl Into<String>) -> Self {
        Algorithm(name.into().to_ascii_lowercase())
    }

    /// The algorithm name as written in SRI strings.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` if `spec.md`'s strict mode would accept this algorithm.
    pub fn is_strict(&self) -> bool {
        matches!(self.0.as_str(), "sha256" | "sha384" | "sha512")
    }

    /// Priority score used to pick the "best" algorithm in an `Integrity`.
    /// Higher is better; unknown algorithms score `-1`.
    pub fn priority(&self) -> i32 {
        PRIORITY
            .iter()
            .position(|p| *p == self.0)
            .map(|i| i as i32)
            .unwrap_or(-1)
    }

    pub const SHA1: &'static str = "sha1";
    pub const SHA256: &'static str = "sha256";
    pub const SHA384: &'static str = "sha384";
    pub const SHA512: &'static str = "sha512";
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Algorithm {
    fn from(s: &str) -> Self {
        Algorithm::new(s)
    }
}

/// One parsed `algorithm-base64digest[?opts]` token.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Hash {
    /// Algorithm this hash is under.
    pub algorithm: Algorithm,
    /// Base64-encoded digest bytes.
    pub digest: String,
    /// Options trailing the digest (each without its leading `?`).
    pub options: Vec<String>,
}

impl Hash {
    /// Hex-encoded form of the digest, decoding the stored base64.
    pub fn hexdigest(&self) -> Result<String> {
        let bytes = BASE64
            .decode(&self.digest)
            .map_err(|_| Error::BadIntegrity(self.digest.clone()))?;
        Ok(hex::encode(bytes))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.algorithm, self.digest)?;
        for opt in &self.options {
            write!(f, "?{opt}")?;
        }
        Ok(())
    }
}

/// Options controlling SRI string parsing.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParseOptions {
    /// Restrict algorithm/digest/option charset to `spec.md` §3's strict grammar.
    pub strict: bool,
}

/// A multi-algorithm set of SRI hashes describing the same underlying bytes.
#[derive(Clone, Debug, Default)]
pub struct Integrity {
    hashes: Vec<Hash>,
}

impl Integrity {
    /// An empty integrity set.
    pub fn new() -> Self {
        Integrity::default()
    }

    /// All hashes, in insertion order.
    pub fn hashes(&self) -> &[Hash] {
        &self.hashes
    }

    /// `true` if this integrity has no hashes at all.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Parse a whitespace-separated SRI string. Malformed tokens are dropped
    /// silently; in non-strict mode, unrecognized algorithms are retained.
    pub fn parse(s: &str, opts: ParseOptions) -> Integrity {
        let hashes = s
            .split_whitespace()
            .filter_map(|tok| parse_one(tok, opts))
            .collect();
        Integrity { hashes }
    }

    /// Parse and return only the first valid hash, if any.
    pub fn parse_single(s: &str, opts: ParseOptions) -> Option<Hash> {
        s.split_whitespace().find_map(|tok| parse_one(tok, opts))
    }

    /// Build an `Integrity` with one `Hash` per requested algorithm, computed
    /// over `data`.
    pub fn from_data(data: &[u8], algorithms: &[Algorithm], options: &[String]) -> Result<Integrity> {
        let algos: Vec<Algorithm> = if algorithms.is_empty() {
            vec![Algorithm::new(Algorithm::SHA512)]
        } else {
            algorithms.to_vec()
        };
        let hashes = algos
            .into_iter()
            .map(|algo| {
                let digest = digest_bytes(&algo, data)?;
                Ok(Hash {
                    algorithm: algo,
                    digest: BASE64.encode(digest),
                    options: options.to_vec(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Integrity { hashes })
    }

    /// Build an `Integrity` with a single `Hash` from an already-hex-encoded digest.
    pub fn from_hex(hex_digest: &str, algorithm: Algorithm, options: &[String]) -> Result<Integrity> {
        let bytes = hex::decode(hex_digest).map_err(|_| Error::BadIntegrity(hex_digest.to_string()))?;
        Ok(Integrity {
            hashes: vec![Hash {
                algorithm,
                digest: BASE64.encode(bytes),
                options: options.to_vec(),
            }],
        })
    }

    /// The algorithm, and hex digest, of this integrity's best hash.
    /// Mirrors the real cacache family's `Integrity::to_hex`.
    pub fn to_hex(&self) -> Result<(Algorithm, String)> {
        let algo = self.pick_algorithm()?;
        let hash = self
            .hashes
            .iter()
            .find(|h| h.algorithm == algo)
            .expect("pick_algorithm only returns an algorithm present in self.hashes");
        Ok((algo, hash.hexdigest()?))
    }

    /// Pick the "best" algorithm among this integrity's hashes, per the
    /// default priority table in `spec.md` §4.1. Fails if empty.
    pub fn pick_algorithm(&self) -> Result<Algorithm> {
        self.pick_algorithm_by(|a| a.priority())
    }

    /// Pick the "best" algorithm using a custom scoring function. Ties are
    /// broken by insertion order of the first hash under that algorithm.
    pub fn pick_algorithm_by(&self, score: impl Fn(&Algorithm) -> i32) -> Result<Algorithm> {
        if self.hashes.is_empty() {
            return Err(Error::InvalidArgument(
                "cannot pick an algorithm from an empty Integrity".into(),
            ));
        }
        let mut best: Option<&Algorithm> = None;
        let mut best_score = i32::MIN;
        for h in &self.hashes {
            let s = score(&h.algorithm);
            if best.is_none() || s > best_score {
                best = Some(&h.algorithm);
                best_score = s;
            }
        }
        Ok(best.expect("checked non-empty above").clone())
    }

    /// All hashes under the given algorithm, in insertion order.
    pub fn hashes_for(&self, algorithm: &Algorithm) -> impl Iterator<Item = &Hash> {
        self.hashes.iter().filter(move |h| h.algorithm == *algorithm)
    }

    /// Verify `data` against this integrity, returning the matching `Hash`.
    /// Uses the algorithm [`Integrity::pick_algorithm`] selects.
    pub fn check(&self, data: &[u8], expected_size: Option<usize>) -> Result<Hash> {
        if let Some(size) = expected_size {
            if data.len() != size {
                return Err(Error::SizeMismatch {
                    expected: size,
                    actual: data.len(),
                });
            }
        }
        let algo = self.pick_algorithm()?;
        let digest = digest_bytes(&algo, data)?;
        let encoded = BASE64.encode(&digest);
        self.hashes_for(&algo)
            .find(|h| h.digest == encoded)
            .cloned()
            .ok_or_else(|| Error::IntegrityMismatch {
                wanted: self.to_string(),
                found: format!("{algo}-{encoded}"),
            })
    }

    /// Infallible variant of [`Integrity::check`].
    pub fn matches(&self, data: &[u8]) -> bool {
        self.check(data, None).is_ok()
    }

    /// Verify a readable stream against this integrity without buffering the
    /// whole content in memory. Returns the matching `Hash` and the byte count
    /// read.
    pub fn check_stream<R: Read>(&self, mut reader: R, expected_size: Option<usize>) -> Result<(Hash, usize)> {
        let algo = self.pick_algorithm()?;
        let mut hasher = StreamHasher::new(&algo)?;
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0usize;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n;
        }
        if let Some(size) = expected_size {
            if total != size {
                return Err(Error::SizeMismatch {
                    expected: size,
                    actual: total,
                });
            }
        }
        let encoded = BASE64.encode(hasher.finalize());
        let hash = self
            .hashes_for(&algo)
            .find(|h| h.digest == encoded)
            .cloned()
            .ok_or_else(|| Error::IntegrityMismatch {
                wanted: self.to_string(),
                found: format!("{algo}-{encoded}"),
            })?;
        Ok((hash, total))
    }

    /// Canonical string form using a custom separator.
    pub fn to_string_sep(&self, sep: &str) -> String {
        self.hashes
            .iter()
            .map(|h| h.to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(sep)
    }
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_sep(" "))
    }
}

impl PartialEq for Integrity {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
impl Eq for Integrity {}

impl FromStr for Integrity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parsed = Integrity::parse(s, ParseOptions::default());
        if parsed.is_empty() {
            Err(Error::BadIntegrity(s.to_string()))
        } else {
            Ok(parsed)
        }
    }
}

impl From<Hash> for Integrity {
    fn from(h: Hash) -> Self {
        Integrity { hashes: vec![h] }
    }
}

impl serde::Serialize for Integrity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Integrity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn parse_one(token: &str, opts: ParseOptions) -> Option<Hash> {
    let dash = token.find('-')?;
    let (algo_str, rest) = (&token[..dash], &token[dash + 1..]);
    if algo_str.is_empty() || rest.is_empty() {
        return None;
    }
    let mut parts = rest.split('?');
    let digest = parts.next()?.to_string();
    let options: Vec<String> = parts.map(String::from).collect();
    let algorithm = Algorithm::new(algo_str);

    if opts.strict {
        if !algorithm.is_strict() {
            return None;
        }
        if !is_base64(&digest) {
            return None;
        }
        if options.iter().any(|o| !is_vchar(o)) {
            return None;
        }
    }

    Some(Hash {
        algorithm,
        digest,
        options,
    })
}

fn is_base64(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    let mut seen_pad = false;
    for c in s.chars() {
        if seen_pad {
            if c != '=' {
                return false;
            }
            continue;
        }
        if c == '=' {
            seen_pad = true;
            continue;
        }
        if !(c.is_ascii_alphanumeric() || c == '+' || c == '/') {
            return false;
        }
    }
    true
}

fn is_vchar(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| ('\x21'..='\x7e').contains(&c))
}

fn digest_bytes(algorithm: &Algorithm, data: &[u8]) -> Result<Vec<u8>> {
    Ok(match algorithm.as_str() {
        "sha1" => {
            use sha1::Digest as _;
            sha1::Sha1::digest(data).to_vec()
        }
        "sha256" => sha2::Sha256::digest(data).to_vec(),
        "sha384" => sha2::Sha384::digest(data).to_vec(),
        "sha512" => sha2::Sha512::digest(data).to_vec(),
        other => return Err(Error::NoSuchAlgorithm(other.to_string())),
    })
}

/// Streaming builder for `Integrity` values: hash bytes incrementally across
/// one or more algorithms without buffering the whole input. Unsupported
/// algorithms passed to [`IntegrityOpts::algorithm`] are silently dropped
/// (mirrors the teacher's `ssri::IntegrityOpts::new().algorithm(..).chain(..).result()`
/// call convention, which never fails).
#[derive(Default)]
pub struct IntegrityOpts {
    options: Vec<String>,
    hashers: Vec<(Algorithm, StreamHasher)>,
}

impl IntegrityOpts {
    /// A builder with no algorithms configured yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an algorithm to hash under. Ignored if unsupported.
    pub fn algorithm(mut self, algo: Algorithm) -> Self {
        if let Ok(h) = StreamHasher::new(&algo) {
            self.hashers.push((algo, h));
        }
        self
    }

    /// Options to attach to every resulting `Hash`.
    pub fn options(mut self, opts: Vec<String>) -> Self {
        self.options = opts;
        self
    }

    /// Feed bytes into every configured hasher. Defaults to `sha512` if no
    /// algorithm was configured by the time the first bytes arrive.
    pub fn input(&mut self, data: &[u8]) -> &mut Self {
        if self.hashers.is_empty() {
            if let Ok(h) = StreamHasher::new(&Algorithm::new(Algorithm::SHA512)) {
                self.hashers.push((Algorithm::new(Algorithm::SHA512), h));
            }
        }
        for (_, h) in self.hashers.iter_mut() {
            h.update(data);
        }
        self
    }

    /// Consuming variant of [`IntegrityOpts::input`].
    pub fn chain(mut self, data: impl AsRef<[u8]>) -> Self {
        self.input(data.as_ref());
        self
    }

    /// Finalize into an `Integrity` with one `Hash` per configured algorithm.
    /// Defaults to `sha512` if neither [`IntegrityOpts::algorithm`] nor
    /// [`IntegrityOpts::input`]/[`IntegrityOpts::chain`] ever ran, so that
    /// hashing zero bytes still yields a usable digest (matches
    /// [`Integrity::from_data`]'s empty-input behavior).
    pub fn result(self) -> Integrity {
        let mut hashers = self.hashers;
        if hashers.is_empty() {
            if let Ok(h) = StreamHasher::new(&Algorithm::new(Algorithm::SHA512)) {
                hashers.push((Algorithm::new(Algorithm::SHA512), h));
            }
        }
        let options = self.options;
        let hashes = hashers
            .into_iter()
            .map(|(algorithm, hasher)| Hash {
                algorithm,
                digest: BASE64.encode(hasher.finalize()),
                options: options.clone(),
            })
            .collect();
        Integrity { hashes }
    }
}

/// Incremental hasher over the algorithms this crate can actually compute.
enum StreamHasher {
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha384(sha2::Sha384),
    Sha512(sha2::Sha512),
}

impl StreamHasher {
    fn new(algorithm: &Algorithm) -> Result<Self> {
        use sha1::Digest as _;
        Ok(match algorithm.as_str() {
            "sha1" => StreamHasher::Sha1(sha1::Sha1::new()),
            "sha256" => StreamHasher::Sha256(sha2::Sha256::new()),
            "sha384" => StreamHasher::Sha384(sha2::Sha384::new()),
            "sha512" => StreamHasher::Sha512(sha2::Sha512::new()),
            other => return Err(Error::NoSuchAlgorithm(other.to_string())),
        })
    }

    fn update(&mut self, buf: &[u8]) {
        use sha1::Digest as _;
        match self {
            StreamHasher::Sha1(h) => h.update(buf),
            StreamHasher::Sha256(h) => h.update(buf),
            StreamHasher::Sha384(h) => h.update(buf),
            StreamHasher::Sha512(h) => h.update(buf),
        }
    }

    fn finalize(self) -> Vec<u8> {
        use sha1::Digest as _;
        match self {
            StreamHasher::Sha1(h) => h.finalize().to_vec(),
            StreamHasher::Sha256(h) => h.finalize().to_vec(),
            StreamHasher::Sha384(h) => h.finalize().to_vec(),
            StreamHasher::Sha512(h) => h.finalize().to_vec(),
        }
    }
}
