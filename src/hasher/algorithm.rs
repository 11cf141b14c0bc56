//! Pluggable content digest algorithms.
//!
//! # Overview
//!
//! The engine hashes through the [`ContentHasher`] capability. Two variants
//! ship with the crate, selected by the tagged [`HashAlgorithm`] value:
//!
//! - `sha256` ([`Sha256Hasher`], the default): cryptographic, 32-byte digest
//! - `blake3` ([`Blake3Hasher`]): much faster on large files, 32-byte digest
//!
//! Digests are lowercase hex strings.

use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default read buffer size (64 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Computes a digest over a byte stream.
pub trait ContentHasher: Send + Sync {
    /// Stream `reader` to the end and return the lowercase hex digest.
    ///
    /// # Errors
    ///
    /// Any I/O error raised by the reader.
    fn compute(&self, reader: &mut dyn Read) -> io::Result<String>;

    /// Name used in configuration and reports.
    fn algorithm_name(&self) -> &'static str;

    /// Digest length in bytes (the hex form is twice as long).
    fn digest_len(&self) -> usize;
}

/// Read `reader` in `buffer_size` chunks, feeding each chunk to `update`.
fn stream_chunks(
    reader: &mut dyn Read,
    buffer_size: usize,
    mut update: impl FnMut(&[u8]),
) -> io::Result<()> {
    let mut buffer = vec![0u8; buffer_size.max(1)];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(n) => update(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// SHA-256 content hasher.
#[derive(Debug, Clone)]
pub struct Sha256Hasher {
    buffer_size: usize,
}

impl Default for Sha256Hasher {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl Sha256Hasher {
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }
}

impl ContentHasher for Sha256Hasher {
    fn compute(&self, reader: &mut dyn Read) -> io::Result<String> {
        let mut hasher = Sha256::new();
        stream_chunks(reader, self.buffer_size, |chunk| hasher.update(chunk))?;
        Ok(hex::encode(hasher.finalize()))
    }

    fn algorithm_name(&self) -> &'static str {
        HashAlgorithm::Sha256.name()
    }

    fn digest_len(&self) -> usize {
        32
    }
}

/// BLAKE3 content hasher.
#[derive(Debug, Clone)]
pub struct Blake3Hasher {
    buffer_size: usize,
}

impl Default for Blake3Hasher {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl Blake3Hasher {
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }
}

impl ContentHasher for Blake3Hasher {
    fn compute(&self, reader: &mut dyn Read) -> io::Result<String> {
        let mut hasher = blake3::Hasher::new();
        stream_chunks(reader, self.buffer_size, |chunk| {
            hasher.update(chunk);
        })?;
        Ok(hasher.finalize().to_hex().to_string())
    }

    fn algorithm_name(&self) -> &'static str {
        HashAlgorithm::Blake3.name()
    }

    fn digest_len(&self) -> usize {
        blake3::OUT_LEN
    }
}

/// Tagged algorithm selector used in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 2] = [HashAlgorithm::Sha256, HashAlgorithm::Blake3];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }

    /// Build a hasher for this algorithm.
    #[must_use]
    pub fn hasher(self, buffer_size: usize) -> Arc<dyn ContentHasher> {
        match self {
            Self::Sha256 => Arc::new(Sha256Hasher::new(buffer_size)),
            Self::Blake3 => Arc::new(Blake3Hasher::new(buffer_size)),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error for an unrecognised algorithm name.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown hash algorithm '{name}'{}", suggestion_suffix(.suggestion.as_deref()))]
pub struct UnknownAlgorithm {
    pub name: String,
    pub suggestion: Option<&'static str>,
}

fn suggestion_suffix(suggestion: Option<&str>) -> String {
    suggestion.map_or_else(String::new, |s| format!(" (did you mean '{s}'?)"))
}

impl FromStr for HashAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        if let Some(found) = Self::ALL.into_iter().find(|a| a.name() == wanted) {
            return Ok(found);
        }
        let suggestion = Self::ALL
            .into_iter()
            .map(|a| (a.name(), strsim::jaro_winkler(&wanted, a.name())))
            .filter(|(_, score)| *score > 0.7)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| name);
        Err(UnknownAlgorithm {
            name: s.to_string(),
            suggestion,
        })
    }
}

/// Names of every supported algorithm.
#[must_use]
pub fn supported_algorithms() -> Vec<&'static str> {
    HashAlgorithm::ALL.iter().map(|a| a.name()).collect()
}

/// Whether `digest` looks like a hex digest produced by `hasher`.
#[must_use]
pub fn validate_digest(hasher: &dyn ContentHasher, digest: &str) -> bool {
    digest.len() == hasher.digest_len() * 2 && digest.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Compare two hex digests, ignoring case.
#[must_use]
pub fn digests_equal(a: &str, b: &str) -> bool {
    !a.is_empty() && a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_sha256_known_vector() {
        let digest = Sha256Hasher::default()
            .compute(&mut Cursor::new(b"hello"))
            .unwrap();
        assert_eq!(digest, HELLO_SHA256);
    }

    #[test]
    fn test_small_buffer_gives_same_digest() {
        let data = vec![7u8; 10_000];
        let big = Sha256Hasher::default().compute(&mut Cursor::new(&data)).unwrap();
        let small = Sha256Hasher::new(3).compute(&mut Cursor::new(&data)).unwrap();
        assert_eq!(big, small);
    }

    #[test]
    fn test_blake3_matches_reference() {
        let digest = Blake3Hasher::default()
            .compute(&mut Cursor::new(b"hello"))
            .unwrap();
        assert_eq!(digest, blake3::hash(b"hello").to_hex().to_string());
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn test_algorithms_differ() {
        let a = HashAlgorithm::Sha256.hasher(DEFAULT_BUFFER_SIZE);
        let b = HashAlgorithm::Blake3.hasher(DEFAULT_BUFFER_SIZE);
        let da = a.compute(&mut Cursor::new(b"x")).unwrap();
        let db = b.compute(&mut Cursor::new(b"x")).unwrap();
        assert_ne!(da, db);
        assert_eq!(a.algorithm_name(), "sha256");
        assert_eq!(b.algorithm_name(), "blake3");
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!("SHA256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("blake3".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Blake3);

        let err = "blak3".parse::<HashAlgorithm>().unwrap_err();
        assert_eq!(err.suggestion, Some("blake3"));
        assert!(err.to_string().contains("did you mean 'blake3'"));

        let err = "md5".parse::<HashAlgorithm>().unwrap_err();
        assert_eq!(err.suggestion, None);
    }

    #[test]
    fn test_serde_tag() {
        let json = serde_json::to_string(&HashAlgorithm::Blake3).unwrap();
        assert_eq!(json, "\"blake3\"");
    }

    #[test]
    fn test_validate_digest() {
        let hasher = Sha256Hasher::default();
        assert!(validate_digest(&hasher, HELLO_SHA256));
        assert!(validate_digest(&hasher, &HELLO_SHA256.to_uppercase()));
        assert!(!validate_digest(&hasher, "abc"));
        assert!(!validate_digest(&hasher, &"z".repeat(64)));
    }

    #[test]
    fn test_digests_equal() {
        assert!(digests_equal("ABCD", "abcd"));
        assert!(!digests_equal("abcd", "abce"));
        assert!(!digests_equal("", ""));
    }

    #[test]
    fn test_supported_algorithms() {
        assert_eq!(supported_algorithms(), vec!["sha256", "blake3"]);
    }
}
