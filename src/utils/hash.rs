//! Hash calculation utilities.

use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::Sha256;

/// All digests of one content buffer, computed in a single pass.
///
/// Every hash-based signature kind queries against these, so they are
/// computed once per layer and shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigests {
    /// MD5 hash, lowercase hex
    pub md5: String,
    /// SHA-1 hash, lowercase hex
    pub sha1: String,
    /// SHA-256 hash, lowercase hex
    pub sha256: String,
    /// Content size in bytes
    pub size: u64,
}

impl ContentDigests {
    /// Compute all digests of a byte buffer.
    pub fn of(data: &[u8]) -> Self {
        let mut md5 = Md5::new();
        let mut sha1 = Sha1::new();
        let mut sha256 = Sha256::new();

        md5.update(data);
        sha1.update(data);
        sha256.update(data);

        Self {
            md5: hex::encode(md5.finalize()),
            sha1: hex::encode(sha1.finalize()),
            sha256: hex::encode(sha256.finalize()),
            size: data.len() as u64,
        }
    }
}

/// MD5 of a byte buffer, lowercase hex.
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 of a byte buffer, lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
