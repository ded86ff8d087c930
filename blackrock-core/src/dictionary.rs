//! Field/value normalization and postings file naming
//!
//! Every `(field, value)` pair maps to
//! `<segment>/inv/<field>/metro_32_<h % 32>/<value>.p` where `h` is the
//! 64-bit MetroHash of the sanitized value. The 32-way shard bounds the
//! number of entries in any single directory.
//!
//! Names are lowercased, restricted to `[a-z0-9:_-]` and truncated to 64
//! bytes. Two long values that agree on their first 64 sanitized bytes
//! share a postings file and cannot be told apart on retrieval.

use metrohash::MetroHash64;
use regex::Regex;
use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Maximum length of a sanitized name in bytes
pub const MAX_NAME_LEN: usize = 64;

/// Number of hash shards per field directory
pub const SHARDS: u64 = 32;

/// Directory under a segment holding the inverted postings tree
pub const INVERTED_DIR: &str = "inv";

fn disallowed() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9:_\-]").expect("static regex"))
}

/// Lowercase, replace anything outside `[a-z0-9:_-]` with `_`, cap at 64 bytes
pub fn sanitize(s: &str) -> String {
    let lowered = s.to_lowercase();
    let mut out = disallowed().replace_all(&lowered, "_").into_owned();
    // output is pure ASCII, so any byte index is a char boundary
    out.truncate(MAX_NAME_LEN);
    out
}

/// 64-bit MetroHash with seed 0
pub fn metro_hash_64(data: &[u8]) -> u64 {
    let mut hasher = MetroHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

/// Relative location of the postings file for an already sanitized pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PostingsPath {
    pub field: String,
    pub value: String,
    pub shard: u64,
}

impl PostingsPath {
    /// Sanitize both sides and compute the shard
    pub fn new(field: &str, value: &str) -> Self {
        let field = sanitize(field);
        let value = sanitize(value);
        let shard = metro_hash_64(value.as_bytes()) % SHARDS;
        Self { field, value, shard }
    }

    /// `<field>/metro_32_<shard>`
    pub fn dir(&self, inverted_root: &Path) -> PathBuf {
        inverted_root
            .join(&self.field)
            .join(format!("metro_{}_{}", SHARDS, self.shard))
    }

    /// `<value>.p`
    pub fn file_name(&self) -> String {
        format!("{}.p", self.value)
    }

    pub fn full(&self, inverted_root: &Path) -> PathBuf {
        self.dir(inverted_root).join(self.file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("City"), "city");
        assert_eq!(sanitize("user id/ä"), "user_id__");
        assert_eq!(sanitize("year-month:2020_03"), "year-month:2020_03");
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize(".."), "__");
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "x".repeat(200);
        assert_eq!(sanitize(&long).len(), MAX_NAME_LEN);

        let a = format!("{}a", "v".repeat(64));
        let b = format!("{}b", "v".repeat(64));
        assert_eq!(PostingsPath::new("f", &a), PostingsPath::new("f", &b));
    }

    #[test]
    fn test_path_is_stable() {
        let root = Path::new("/seg/inv");
        let p1 = PostingsPath::new("City", "Vinkeveen");
        let p2 = PostingsPath::new("city", "vinkeveen");
        assert_eq!(p1.full(root), p2.full(root));
        assert!(p1.shard < SHARDS);

        let full = p1.full(root).to_string_lossy().into_owned();
        assert!(full.starts_with("/seg/inv/city/metro_32_"));
        assert!(full.ends_with("/vinkeveen.p"));
        assert!(full.is_ascii());
    }

    #[test]
    fn test_metro_hash_deterministic() {
        assert_eq!(metro_hash_64(b"abc"), metro_hash_64(b"abc"));
        assert_ne!(metro_hash_64(b"abc"), metro_hash_64(b"abd"));
    }
}
