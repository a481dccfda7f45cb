//! Local filesystem cache tier (spec.md §4.4 tier 1): artifacts live at
//! `<root>/<prefix>/<hex>`, prefix-partitioned the way git's loose object
//! store avoids one giant flat directory. Not inter-process locked —
//! intended for one repo building at a time, matching the spec's note.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::hash::Fingerprint;

use super::{Artifact, CacheError, CacheTier};

const PREFIX_LEN: usize = 2;

pub struct DirectoryCache {
    root: PathBuf,
}

impl DirectoryCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, key: &Fingerprint) -> PathBuf {
        let hex = key.to_hex();
        self.root.join(key.hex_prefix(PREFIX_LEN)).join(hex)
    }

    fn tmp_path(&self, key: &Fingerprint) -> PathBuf {
        self.entry_path(key).with_extension("tmp")
    }
}

#[async_trait]
impl CacheTier for DirectoryCache {
    async fn store(&self, key: &Fingerprint, artifact: &Artifact) -> Result<(), CacheError> {
        let entry = self.entry_path(key);
        let tmp = self.tmp_path(key);
        if let Some(parent) = entry.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&artifact.bytes).await?;
            file.flush().await?;
        }
        // Atomic rename makes partial writes unobservable to concurrent
        // retrievers, satisfying the "retrieval is transactional" guarantee.
        tokio::fs::rename(&tmp, &entry).await?;
        Ok(())
    }

    async fn retrieve(&self, key: &Fingerprint) -> Result<Option<Artifact>, CacheError> {
        let entry = self.entry_path(key);
        match tokio::fs::read(&entry).await {
            Ok(bytes) => Ok(Some(Artifact { bytes })),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CacheError::Io(err)),
        }
    }

    async fn clean(&self, key: Option<&Fingerprint>) -> Result<(), CacheError> {
        match key {
            Some(k) => {
                let entry = self.entry_path(k);
                match tokio::fs::remove_file(&entry).await {
                    Ok(()) => Ok(()),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(err) => Err(CacheError::Io(err)),
                }
            }
            None => match tokio::fs::remove_dir_all(&self.root).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(CacheError::Io(err)),
            },
        }
    }
}

/// Whether `path` looks like a cache root already in use (has at least one
/// two-hex-char prefix directory), a small helper used by `plz clean`'s
/// confirmation prompt upstream of this crate.
pub fn looks_populated(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| {
            entries.any(|e| {
                e.ok()
                    .map(|e| e.file_name().len() == PREFIX_LEN)
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hasher;

    fn key(s: &str) -> Fingerprint {
        Hasher::new().put_str(s).finalize()
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DirectoryCache::new(dir.path());
        let k = key("a");
        let artifact = Artifact { bytes: b"hello".to_vec() };
        cache.store(&k, &artifact).await.unwrap();
        let got = cache.retrieve(&k).await.unwrap().unwrap();
        assert_eq!(got.bytes, b"hello");
    }

    #[tokio::test]
    async fn missing_key_is_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DirectoryCache::new(dir.path());
        assert!(cache.retrieve(&key("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clean_single_key_removes_only_that_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DirectoryCache::new(dir.path());
        let a = key("a");
        let b = key("b");
        cache.store(&a, &Artifact { bytes: vec![1] }).await.unwrap();
        cache.store(&b, &Artifact { bytes: vec![2] }).await.unwrap();
        cache.clean(Some(&a)).await.unwrap();
        assert!(cache.retrieve(&a).await.unwrap().is_none());
        assert!(cache.retrieve(&b).await.unwrap().is_some());
    }
}
