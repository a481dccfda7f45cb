//! Shared filesystem types: errors, stat results, directory entries.

use std::time::SystemTime;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum FsError {
    #[error("ENOENT: no such file or directory, {operation} '{path}'")]
    NotFound { path: String, operation: String },

    #[error("EEXIST: file already exists, {operation} '{path}'")]
    AlreadyExists { path: String, operation: String },

    #[error("EISDIR: illegal operation on a directory, {operation} '{path}'")]
    IsDirectory { path: String, operation: String },

    #[error("ENOTDIR: not a directory, {operation} '{path}'")]
    NotDirectory { path: String, operation: String },

    #[error("EINVAL: invalid argument, {operation} '{path}'")]
    InvalidArgument { path: String, operation: String },

    #[error("EPERM: operation not permitted, {operation} '{path}'")]
    PermissionDenied { path: String, operation: String },

    #[error("{message}")]
    Other { message: String },
}

impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => FsError::NotFound {
                path: String::new(),
                operation: "io".to_string(),
            },
            ErrorKind::AlreadyExists => FsError::AlreadyExists {
                path: String::new(),
                operation: "io".to_string(),
            },
            ErrorKind::PermissionDenied => FsError::PermissionDenied {
                path: String::new(),
                operation: "io".to_string(),
            },
            _ => FsError::Other {
                message: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct FsStat {
    pub is_file: bool,
    pub is_directory: bool,
    pub is_symlink: bool,
    pub mode: u32,
    pub size: u64,
    pub mtime: SystemTime,
}

#[derive(Debug, Clone)]
pub struct DirentEntry {
    pub name: String,
    pub is_file: bool,
    pub is_directory: bool,
    pub is_symlink: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MkdirOptions {
    pub recursive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RmOptions {
    pub recursive: bool,
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_fs_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "x");
        assert!(matches!(FsError::from(io_err), FsError::NotFound { .. }));
    }
}
