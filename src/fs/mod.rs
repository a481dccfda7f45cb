//! Filesystem abstraction used to read package sources, stage sandbox
//! inputs, and write build outputs.
//!
//! Kept as a trait (rather than calling `std::fs` directly everywhere) so
//! `graph`/`lang`/`exec` can all be exercised against an in-memory tree in
//! tests, the same separation the teacher draws between `FileSystem` and
//! its `InMemoryFs`/real-disk implementations.

pub mod in_memory_fs;
pub mod real_fs;
pub mod types;

pub use in_memory_fs::InMemoryFs;
pub use real_fs::RealFs;
pub use types::{DirentEntry, FsError, FsStat, MkdirOptions, RmOptions};

use async_trait::async_trait;

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<String, FsError>;
    async fn read_file_bytes(&self, path: &str) -> Result<Vec<u8>, FsError>;
    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), FsError>;
    async fn exists(&self, path: &str) -> bool;
    async fn stat(&self, path: &str) -> Result<FsStat, FsError>;
    async fn mkdir(&self, path: &str, options: &MkdirOptions) -> Result<(), FsError>;
    async fn readdir_with_file_types(&self, path: &str) -> Result<Vec<DirentEntry>, FsError>;
    async fn rm(&self, path: &str, options: &RmOptions) -> Result<(), FsError>;
    async fn copy(&self, src: &str, dest: &str) -> Result<(), FsError>;
    async fn symlink(&self, target: &str, link_path: &str) -> Result<(), FsError>;

    /// Resolve a relative path against a base path, used by the
    /// BUILD-language interpreter to turn a package-relative `srcs` entry
    /// into an absolute one.
    fn resolve_path(&self, base: &str, path: &str) -> String;
}
