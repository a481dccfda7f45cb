//! Exclusive repo lock (spec.md §5: "On startup the core acquires an
//! exclusive lock on a well-known file in the output directory; on clean
//! exit the lock is released"). `nix::fcntl::flock` is the lower-level
//! primitive the pack's `nix`-using examples reach for over shelling out
//! to `flock(1)`.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{flock, FlockArg};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("could not open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("repo is locked by another `plz` invocation (pass --unsafe_ignore_lock to override): {0}")]
    Held(PathBuf),
}

/// Held for the lifetime of one `plz` invocation. The `flock` is tied to
/// the file descriptor, so the lock releases itself the moment this value
/// (and the `File` it wraps) is dropped — no explicit `release()` needed
/// for a clean exit.
pub struct RepoLock {
    _file: File,
    path: PathBuf,
}

impl RepoLock {
    /// Acquires the exclusive lock at `<out_dir>/.lock`, non-blocking.
    /// `unsafe_ignore_lock` is the escape hatch spec.md §5 names: when set,
    /// a lock already held by another process is only logged, not an
    /// error — the caller accepts responsibility for whatever concurrent
    /// writes follow.
    pub fn acquire(out_dir: &Path, unsafe_ignore_lock: bool) -> Result<Self, LockError> {
        std::fs::create_dir_all(out_dir).map_err(|source| LockError::Open {
            path: out_dir.to_path_buf(),
            source,
        })?;
        let path = out_dir.join(".lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|source| LockError::Open {
                path: path.clone(),
                source,
            })?;

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => Ok(Self { _file: file, path }),
            Err(_) if unsafe_ignore_lock => {
                tracing::warn!(
                    path = %path.display(),
                    "repo lock already held, proceeding anyway (--unsafe_ignore_lock)"
                );
                Ok(Self { _file: file, path })
            }
            Err(_) => Err(LockError::Held(path)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_and_releases_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let lock = RepoLock::acquire(dir.path(), false).unwrap();
            assert_eq!(lock.path(), dir.path().join(".lock"));
        }
        // Dropped: a second acquire should succeed cleanly.
        let _lock2 = RepoLock::acquire(dir.path(), false).unwrap();
    }

    #[test]
    fn second_concurrent_acquire_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let _held = RepoLock::acquire(dir.path(), false).unwrap();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.path().join(".lock"))
            .unwrap();
        let second = flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock);
        assert!(second.is_err());
    }

    #[test]
    fn unsafe_ignore_lock_overrides_a_held_lock() {
        let dir = tempfile::tempdir().unwrap();
        let _held = RepoLock::acquire(dir.path(), false).unwrap();
        assert!(RepoLock::acquire(dir.path(), true).is_ok());
    }
}
