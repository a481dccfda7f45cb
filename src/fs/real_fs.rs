//! A [`FileSystem`] backed directly by the host disk, rooted at an
//! absolute directory (a repository checkout, or a sandbox staging dir).
//! All paths passed to its methods are relative to that root.

use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::types::*;
use super::FileSystem;

pub struct RealFs {
    root: PathBuf,
}

impl RealFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/');
        self.root.join(path)
    }
}

#[async_trait]
impl FileSystem for RealFs {
    async fn read_file(&self, path: &str) -> Result<String, FsError> {
        let full = self.resolve(path);
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| annotate(e, &full, "read"))
    }

    async fn read_file_bytes(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let full = self.resolve(path);
        tokio::fs::read(&full)
            .await
            .map_err(|e| annotate(e, &full, "read"))
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| annotate(e, parent, "mkdir"))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| annotate(e, &full, "write"))
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::metadata(self.resolve(path)).await.is_ok()
    }

    async fn stat(&self, path: &str) -> Result<FsStat, FsError> {
        let full = self.resolve(path);
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|e| annotate(e, &full, "stat"))?;
        Ok(FsStat {
            is_file: meta.is_file(),
            is_directory: meta.is_dir(),
            is_symlink: meta.file_type().is_symlink(),
            mode: meta.permissions().mode(),
            size: meta.size(),
            mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        })
    }

    async fn mkdir(&self, path: &str, options: &MkdirOptions) -> Result<(), FsError> {
        let full = self.resolve(path);
        let result = if options.recursive {
            tokio::fs::create_dir_all(&full).await
        } else {
            tokio::fs::create_dir(&full).await
        };
        result.map_err(|e| annotate(e, &full, "mkdir"))
    }

    async fn readdir_with_file_types(&self, path: &str) -> Result<Vec<DirentEntry>, FsError> {
        let full = self.resolve(path);
        let mut read_dir = tokio::fs::read_dir(&full)
            .await
            .map_err(|e| annotate(e, &full, "readdir"))?;
        let mut out = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| annotate(e, &full, "readdir"))?
        {
            let ft = entry
                .file_type()
                .await
                .map_err(|e| annotate(e, &full, "readdir"))?;
            out.push(DirentEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_file: ft.is_file(),
                is_directory: ft.is_dir(),
                is_symlink: ft.is_symlink(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn rm(&self, path: &str, options: &RmOptions) -> Result<(), FsError> {
        let full = self.resolve(path);
        let meta = match tokio::fs::symlink_metadata(&full).await {
            Ok(m) => m,
            Err(e) if options.force && e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(annotate(e, &full, "rm")),
        };
        let result = if meta.is_dir() && options.recursive {
            tokio::fs::remove_dir_all(&full).await
        } else if meta.is_dir() {
            tokio::fs::remove_dir(&full).await
        } else {
            tokio::fs::remove_file(&full).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(_) if options.force => Ok(()),
            Err(e) => Err(annotate(e, &full, "rm")),
        }
    }

    async fn copy(&self, src: &str, dest: &str) -> Result<(), FsError> {
        let src_full = self.resolve(src);
        let dest_full = self.resolve(dest);
        if let Some(parent) = dest_full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| annotate(e, parent, "mkdir"))?;
        }
        tokio::fs::copy(&src_full, &dest_full)
            .await
            .map(|_| ())
            .map_err(|e| annotate(e, &src_full, "copy"))
    }

    async fn symlink(&self, target: &str, link_path: &str) -> Result<(), FsError> {
        let full = self.resolve(link_path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| annotate(e, parent, "mkdir"))?;
        }
        tokio::fs::symlink(target, &full)
            .await
            .map_err(|e| annotate(e, &full, "symlink"))
    }

    fn resolve_path(&self, base: &str, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", base.trim_end_matches('/'), path)
        }
    }
}

fn annotate(e: std::io::Error, path: &Path, operation: &str) -> FsError {
    let path = path.to_string_lossy().to_string();
    match e.kind() {
        std::io::ErrorKind::NotFound => FsError::NotFound {
            path,
            operation: operation.to_string(),
        },
        std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists {
            path,
            operation: operation.to_string(),
        },
        std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied {
            path,
            operation: operation.to_string(),
        },
        _ => FsError::Other {
            message: format!("{operation} '{path}': {e}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_round_trips_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFs::new(dir.path());
        fs.write_file("pkg/out.txt", b"hi").await.unwrap();
        assert_eq!(fs.read_file("pkg/out.txt").await.unwrap(), "hi");
        assert!(fs.exists("pkg/out.txt").await);
    }

    #[tokio::test]
    async fn readdir_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFs::new(dir.path());
        fs.write_file("b.txt", b"1").await.unwrap();
        fs.write_file("a.txt", b"1").await.unwrap();
        let names: Vec<String> = fs
            .readdir_with_file_types("")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }
}
