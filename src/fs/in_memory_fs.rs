//! In-memory virtual filesystem, used by unit/integration tests to stand
//! in for a real source tree or sandbox staging directory without hitting
//! disk.

use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::types::*;
use super::FileSystem;

#[derive(Debug, Clone)]
enum Entry {
    File { content: Vec<u8>, mode: u32 },
    Directory,
    Symlink { target: String },
}

pub struct InMemoryFs {
    data: RwLock<HashMap<String, Entry>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        let mut data = HashMap::new();
        data.insert("/".to_string(), Entry::Directory);
        Self {
            data: RwLock::new(data),
        }
    }

    /// Seed the tree with files before handing it to a reader; used in
    /// tests to set up a package directory in one call.
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let fs = Self::new();
        let mut data = fs.data.blocking_write();
        for (path, content) in files {
            let normalized = normalize(path);
            ensure_parent_dirs(&mut data, &normalized);
            data.insert(
                normalized,
                Entry::File {
                    content: content.as_bytes().to_vec(),
                    mode: 0o644,
                },
            );
        }
        drop(data);
        fs
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(path: &str) -> String {
    let mut out = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            p => out.push(p),
        }
    }
    format!("/{}", out.join("/"))
}

fn ensure_parent_dirs(data: &mut HashMap<String, Entry>, path: &str) {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    let mut current = String::new();
    for part in parts.iter().take(parts.len().saturating_sub(1)) {
        current = format!("{current}/{part}");
        data.entry(current.clone()).or_insert(Entry::Directory);
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read_file(&self, path: &str) -> Result<String, FsError> {
        let bytes = self.read_file_bytes(path).await?;
        String::from_utf8(bytes).map_err(|e| FsError::Other {
            message: format!("not valid utf-8: {e}"),
        })
    }

    async fn read_file_bytes(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let normalized = normalize(path);
        let data = self.data.read().await;
        match data.get(&normalized) {
            Some(Entry::File { content, .. }) => Ok(content.clone()),
            Some(Entry::Directory) => Err(FsError::IsDirectory {
                path: normalized,
                operation: "read".to_string(),
            }),
            _ => Err(FsError::NotFound {
                path: normalized,
                operation: "read".to_string(),
            }),
        }
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        let normalized = normalize(path);
        let mut data = self.data.write().await;
        ensure_parent_dirs(&mut data, &normalized);
        data.insert(
            normalized,
            Entry::File {
                content: content.to_vec(),
                mode: 0o644,
            },
        );
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        self.data.read().await.contains_key(&normalize(path))
    }

    async fn stat(&self, path: &str) -> Result<FsStat, FsError> {
        let normalized = normalize(path);
        let data = self.data.read().await;
        match data.get(&normalized) {
            Some(Entry::File { content, mode }) => Ok(FsStat {
                is_file: true,
                is_directory: false,
                is_symlink: false,
                mode: *mode,
                size: content.len() as u64,
                mtime: SystemTime::now(),
            }),
            Some(Entry::Directory) => Ok(FsStat {
                is_file: false,
                is_directory: true,
                is_symlink: false,
                mode: 0o755,
                size: 0,
                mtime: SystemTime::now(),
            }),
            Some(Entry::Symlink { .. }) => Ok(FsStat {
                is_file: false,
                is_directory: false,
                is_symlink: true,
                mode: 0o777,
                size: 0,
                mtime: SystemTime::now(),
            }),
            None => Err(FsError::NotFound {
                path: normalized,
                operation: "stat".to_string(),
            }),
        }
    }

    async fn mkdir(&self, path: &str, options: &MkdirOptions) -> Result<(), FsError> {
        let normalized = normalize(path);
        let mut data = self.data.write().await;
        if options.recursive {
            ensure_parent_dirs(&mut data, &format!("{normalized}/x"));
        } else {
            let parent = normalized.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
            if !parent.is_empty() && !data.contains_key(parent) {
                return Err(FsError::NotFound {
                    path: parent.to_string(),
                    operation: "mkdir".to_string(),
                });
            }
        }
        data.entry(normalized).or_insert(Entry::Directory);
        Ok(())
    }

    async fn readdir_with_file_types(&self, path: &str) -> Result<Vec<DirentEntry>, FsError> {
        let normalized = normalize(path);
        let data = self.data.read().await;
        if !matches!(data.get(&normalized), Some(Entry::Directory)) {
            return Err(FsError::NotDirectory {
                path: normalized,
                operation: "readdir".to_string(),
            });
        }
        let prefix = if normalized == "/" {
            "/".to_string()
        } else {
            format!("{normalized}/")
        };
        let mut names = std::collections::BTreeSet::new();
        for key in data.keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    names.insert(rest.to_string());
                }
            }
        }
        Ok(names
            .into_iter()
            .map(|name| {
                let full = format!("{prefix}{name}");
                let entry = data.get(&full);
                DirentEntry {
                    name,
                    is_file: matches!(entry, Some(Entry::File { .. })),
                    is_directory: matches!(entry, Some(Entry::Directory)),
                    is_symlink: matches!(entry, Some(Entry::Symlink { .. })),
                }
            })
            .collect())
    }

    async fn rm(&self, path: &str, options: &RmOptions) -> Result<(), FsError> {
        let normalized = normalize(path);
        let mut data = self.data.write().await;
        if options.recursive {
            let prefix = format!("{normalized}/");
            data.retain(|k, _| *k != normalized && !k.starts_with(&prefix));
        } else if data.remove(&normalized).is_none() && !options.force {
            return Err(FsError::NotFound {
                path: normalized,
                operation: "rm".to_string(),
            });
        }
        Ok(())
    }

    async fn copy(&self, src: &str, dest: &str) -> Result<(), FsError> {
        let content = self.read_file_bytes(src).await?;
        self.write_file(dest, &content).await
    }

    async fn symlink(&self, target: &str, link_path: &str) -> Result<(), FsError> {
        let normalized = normalize(link_path);
        let mut data = self.data.write().await;
        ensure_parent_dirs(&mut data, &normalized);
        data.insert(
            normalized,
            Entry::Symlink {
                target: target.to_string(),
            },
        );
        Ok(())
    }

    fn resolve_path(&self, base: &str, path: &str) -> String {
        if path.starts_with('/') {
            normalize(path)
        } else {
            normalize(&format!("{base}/{path}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let fs = InMemoryFs::new();
        fs.write_file("/pkg/foo.txt", b"hello").await.unwrap();
        assert_eq!(fs.read_file("/pkg/foo.txt").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn readdir_lists_direct_children_only() {
        let fs = InMemoryFs::with_files(&[("/pkg/a.txt", "a"), ("/pkg/sub/b.txt", "b")]);
        let mut names: Vec<String> = fs
            .readdir_with_file_types("/pkg")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.txt".to_string(), "sub".to_string()]);
    }

    #[tokio::test]
    async fn rm_recursive_removes_subtree() {
        let fs = InMemoryFs::with_files(&[("/pkg/a.txt", "a"), ("/pkg/sub/b.txt", "b")]);
        fs.rm("/pkg/sub", &RmOptions { recursive: true, force: false })
            .await
            .unwrap();
        assert!(!fs.exists("/pkg/sub/b.txt").await);
        assert!(fs.exists("/pkg/a.txt").await);
    }

    #[tokio::test]
    async fn stat_not_found_for_missing_path() {
        let fs = InMemoryFs::new();
        assert!(matches!(
            fs.stat("/nope").await,
            Err(FsError::NotFound { .. })
        ));
    }
}
