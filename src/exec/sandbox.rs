//! Input staging and Linux namespace isolation (spec.md §4.5).
//!
//! Staging copies (or hardlinks, falling back to copy) a target's declared
//! inputs into a fresh temp directory so the command only ever sees the
//! files it declared. Namespace setup is grounded on
//! `antlir2_isolate`'s `isolate_unshare_preexec::isolation::setup_isolation`:
//! user/UTS/IPC namespaces are always entered, mount and network
//! namespaces only when the target asked to be sandboxed, `/` is made
//! private before anything else, a tmpfs is mounted for scratch space, and
//! the staged dir is bind-mounted in as the process's working directory.
//! Non-Linux platforms degrade silently to unnamespaced execution — there
//! is no sandbox primitive to fall back to there.
//!
//! No PID namespace: `unshare()` runs in `pre_exec`, which fires in the
//! child process right before `execve` replaces it in place — no
//! intervening `fork`. `CLONE_NEWPID` only moves *subsequently forked
//! children* of the calling process into the new namespace, so entering it
//! here would never actually apply to the exec'd process itself.
//! `antlir2_isolate`'s own `unshare()` call omits `CLONE_NEWPID` for the
//! same reason, using a dedicated pid1/pid2 fork boundary instead; this
//! crate follows the simpler half of that pattern and leaves PID-namespace
//! isolation unimplemented rather than silently not taking effect.

use std::path::{Path, PathBuf};

use super::ExecError;

/// A target's inputs, staged into an isolated temp directory.
pub struct StagedDir {
    root: tempfile::TempDir,
}

impl StagedDir {
    /// `files` is `(path relative to the staged root, source path on disk)`.
    pub fn stage(files: &[(String, PathBuf)]) -> Result<Self, ExecError> {
        let root = tempfile::tempdir().map_err(ExecError::Io)?;
        for (rel, src) in files {
            let dst = root.path().join(rel);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent).map_err(ExecError::Io)?;
            }
            stage_one(src, &dst)?;
        }
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Stages into a caller-chosen directory rather than an ephemeral OS
    /// temp dir — used for the on-disk per-target build dirs spec.md §5
    /// names as the core's other writable area (`plz-out/tmp/<target>
    /// ._build`), which must survive past any single `StagedDir` value so
    /// a cache hit or a later `plz clean` can still find it.
    pub fn stage_at(root: &Path, files: &[(String, PathBuf)]) -> Result<(), ExecError> {
        std::fs::create_dir_all(root).map_err(ExecError::Io)?;
        for (rel, src) in files {
            let dst = root.join(rel);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent).map_err(ExecError::Io)?;
            }
            stage_one(src, &dst)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn stage_one(src: &Path, dst: &Path) -> Result<(), ExecError> {
    // Hardlink where possible (same filesystem, cheap, still read-only from
    // the sandboxed process's point of view unless it's made writable
    // below); fall back to a real copy across filesystem boundaries.
    match std::fs::hard_link(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(src, dst).map_err(ExecError::Io)?;
            Ok(())
        }
    }
}

#[cfg(not(unix))]
fn stage_one(src: &Path, dst: &Path) -> Result<(), ExecError> {
    std::fs::copy(src, dst).map_err(ExecError::Io)?;
    Ok(())
}

/// Which Linux namespaces to enter and how to wire up the staged root,
/// decided entirely by the target's declared `sandbox` flag (spec.md:
/// "mount and network namespaces are entered only when the target's
/// `sandbox` attribute is set; user, UTS and IPC namespaces are always
/// entered"). PID namespace isolation is not implemented — see the module
/// doc comment.
#[derive(Debug, Clone)]
pub struct NamespaceConfig {
    pub staged_root: PathBuf,
    pub mount_and_network: bool,
    pub hostname: Option<String>,
}

impl NamespaceConfig {
    pub fn new(staged_root: PathBuf, mount_and_network: bool) -> Self {
        Self {
            staged_root,
            mount_and_network,
            hostname: Some("sandbox".to_string()),
        }
    }

    /// Runs inside the forked child, before `exec`. Only meaningful on
    /// Linux; a no-op everywhere else.
    #[cfg(target_os = "linux")]
    pub fn apply(&self) -> Result<(), ExecError> {
        use nix::mount::{mount, MsFlags};
        use nix::sched::{unshare, CloneFlags};

        let mut flags = CloneFlags::CLONE_NEWUSER | CloneFlags::CLONE_NEWUTS | CloneFlags::CLONE_NEWIPC;
        if self.mount_and_network {
            flags |= CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWNET;
        }
        unshare(flags).map_err(|e| ExecError::Sandbox(format!("unshare failed: {e}")))?;

        if self.mount_and_network {
            // Make `/` private first so nothing we do here leaks back to
            // the parent mount namespace.
            mount(
                None::<&str>,
                "/",
                None::<&str>,
                MsFlags::MS_REC | MsFlags::MS_PRIVATE,
                None::<&str>,
            )
            .map_err(|e| ExecError::Sandbox(format!("making / private failed: {e}")))?;

            bring_loopback_up()?;

            mount(
                None::<&str>,
                "/tmp",
                Some("tmpfs"),
                MsFlags::empty(),
                None::<&str>,
            )
            .map_err(|e| ExecError::Sandbox(format!("mounting tmpfs at /tmp failed: {e}")))?;

            mount(
                Some(self.staged_root.as_path()),
                self.staged_root.as_path(),
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REC,
                None::<&str>,
            )
            .map_err(|e| ExecError::Sandbox(format!("bind-mounting staged dir failed: {e}")))?;

            mount(
                None::<&str>,
                "/",
                None::<&str>,
                MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_BIND,
                None::<&str>,
            )
            .ok(); // best-effort; some kernels/containers reject a root remount
        }

        if let Some(hostname) = &self.hostname {
            nix::unistd::sethostname(hostname)
                .map_err(|e| ExecError::Sandbox(format!("sethostname failed: {e}")))?;
        }

        std::env::set_current_dir(&self.staged_root).map_err(ExecError::Io)?;
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn apply(&self) -> Result<(), ExecError> {
        std::env::set_current_dir(&self.staged_root).map_err(ExecError::Io)
    }
}

#[cfg(target_os = "linux")]
fn bring_loopback_up() -> Result<(), ExecError> {
    use std::net::UdpSocket;
    use std::os::fd::AsRawFd;

    const SIOCGIFFLAGS: libc::c_ulong = 0x8913;
    const SIOCSIFFLAGS: libc::c_ulong = 0x8914;
    const IFF_UP: libc::c_short = 0x1;
    const IFF_RUNNING: libc::c_short = 0x40;

    #[repr(C)]
    struct IfReq {
        ifr_name: [libc::c_char; 16],
        ifr_flags: libc::c_short,
    }

    let sock = UdpSocket::bind("127.0.0.1:0").map_err(ExecError::Io)?;
    let mut req = IfReq {
        ifr_name: [0; 16],
        ifr_flags: 0,
    };
    for (i, b) in b"lo".iter().enumerate() {
        req.ifr_name[i] = *b as libc::c_char;
    }

    unsafe {
        if libc::ioctl(sock.as_raw_fd(), SIOCGIFFLAGS as _, &mut req) < 0 {
            return Err(ExecError::Sandbox("SIOCGIFFLAGS failed".to_string()));
        }
        req.ifr_flags |= IFF_UP | IFF_RUNNING;
        if libc::ioctl(sock.as_raw_fd(), SIOCSIFFLAGS as _, &req) < 0 {
            return Err(ExecError::Sandbox("SIOCSIFFLAGS failed".to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_files_into_fresh_dir() {
        let src_dir = tempfile::tempdir().unwrap();
        let src_file = src_dir.path().join("a.txt");
        std::fs::write(&src_file, b"hello").unwrap();

        let staged = StagedDir::stage(&[("nested/a.txt".to_string(), src_file)]).unwrap();
        let contents = std::fs::read_to_string(staged.path().join("nested/a.txt")).unwrap();
        assert_eq!(contents, "hello");
    }

    #[test]
    fn stage_at_writes_into_the_given_directory() {
        let src_dir = tempfile::tempdir().unwrap();
        let src_file = src_dir.path().join("a.txt");
        std::fs::write(&src_file, b"hello").unwrap();

        let out_dir = tempfile::tempdir().unwrap();
        let root = out_dir.path().join("foo.bar._build");
        StagedDir::stage_at(&root, &[("a.txt".to_string(), src_file)]).unwrap();
        let contents = std::fs::read_to_string(root.join("a.txt")).unwrap();
        assert_eq!(contents, "hello");
    }

    #[test]
    fn namespace_config_carries_mount_flag() {
        let cfg = NamespaceConfig::new(PathBuf::from("/tmp/x"), true);
        assert!(cfg.mount_and_network);
        assert_eq!(cfg.hostname.as_deref(), Some("sandbox"));
    }
}
