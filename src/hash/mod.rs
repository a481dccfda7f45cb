//! Canonical hashing of sources, commands, tools and dependency closures
//! into fixed-size content fingerprints (spec.md §4.4).
//!
//! `RuleHash` combines, in order: the target's canonicalised attributes,
//! the recursive output hashes of resolved dependencies, and the contents
//! of local source files. `OutputHash` is the hash of a built target's
//! output file contents, ordered by relative path, and feeds dependents'
//! rule hashes — this is what makes the build graph content-addressed.

use std::fmt;
use std::path::Path;

use sha2::{Digest, Sha256};

/// A format-version salt mixed into every rule hash. Bump this when the
/// canonicalisation rules below change, so old cache entries are never
/// misread as hits for a differently-hashed target.
const HASH_FORMAT_VERSION: u8 = 1;

/// A fixed-size content digest, hex-displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First `n` hex characters, used as a cache directory-tier prefix.
    pub fn hex_prefix(&self, n: usize) -> String {
        let full = self.to_hex();
        full[..n.min(full.len())].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental hasher. Every `put_*` method appends a length-prefixed,
/// type-tagged encoding of its argument, so that e.g. `put_str("ab")`
/// followed by `put_str("c")` never collides with `put_str("a")` followed
/// by `put_str("bc")`.
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        let mut inner = Sha256::new();
        inner.update([HASH_FORMAT_VERSION]);
        Self { inner }
    }

    pub fn put_u8(&mut self, tag: u8) -> &mut Self {
        self.inner.update([tag]);
        self
    }

    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        self.inner.update(v.to_le_bytes());
        self
    }

    pub fn put_bool(&mut self, v: bool) -> &mut Self {
        self.put_u8(v as u8)
    }

    pub fn put_bytes(&mut self, b: &[u8]) -> &mut Self {
        self.put_u64(b.len() as u64);
        self.inner.update(b);
        self
    }

    pub fn put_str(&mut self, s: &str) -> &mut Self {
        self.put_bytes(s.as_bytes())
    }

    pub fn put_path(&mut self, p: &Path) -> &mut Self {
        self.put_str(&p.to_string_lossy())
    }

    pub fn put_fingerprint(&mut self, f: &Fingerprint) -> &mut Self {
        self.put_bytes(&f.0)
    }

    /// Order-sensitive sequence of strings. Sort beforehand with
    /// [`sorted_strs`] if the caller needs order-independence.
    pub fn put_strs<'a>(&mut self, items: impl IntoIterator<Item = &'a str>) -> &mut Self {
        let items: Vec<&str> = items.into_iter().collect();
        self.put_u64(items.len() as u64);
        for item in items {
            self.put_str(item);
        }
        self
    }

    pub fn finalize(self) -> Fingerprint {
        let digest = self.inner.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Fingerprint(bytes)
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministically order a set of strings before hashing them, for
/// inputs (like label sets) whose declaration order isn't meaningful but
/// whose hash still needs to be stable.
pub fn sorted_strs<'a>(mut items: Vec<&'a str>) -> Vec<&'a str> {
    items.sort_unstable();
    items
}

/// Hash the contents of a single source file as `(relative_path, bytes)`.
pub fn hash_file_content(h: &mut Hasher, relative_path: &str, content: &[u8]) {
    h.put_str(relative_path);
    h.put_bytes(content);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_hash_identically() {
        let mut a = Hasher::new();
        a.put_str("cmd").put_u64(3);
        let mut b = Hasher::new();
        b.put_str("cmd").put_u64(3);
        assert_eq!(a.finalize(), b.finalize());
    }

    #[test]
    fn length_prefixing_avoids_ambiguous_concatenation() {
        let mut a = Hasher::new();
        a.put_str("ab").put_str("c");
        let mut b = Hasher::new();
        b.put_str("a").put_str("bc");
        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn hex_prefix_truncates() {
        let h = Hasher::new().finalize();
        assert_eq!(h.hex_prefix(2).len(), 2);
        assert_eq!(h.hex_prefix(2), h.to_hex()[..2]);
    }
}
