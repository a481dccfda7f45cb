//! Process spawning, output capture and timeout escalation (spec.md §4.5).
//!
//! Every command runs in its own process group so a timeout can kill the
//! whole tree, not just the immediate child — the `setpgid`/Pdeathsig setup
//! here mirrors the `pre_exec` hook in `dashflow`'s spawn path. Stdout and
//! stderr are captured interleaved into one buffer (line order matters for
//! `[NN%]` progress-marker scanning), and a deadline escalates
//! SIGTERM -> 30ms -> SIGTERM -> 1s -> SIGKILL if the process group is
//! still alive.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::sleep;

use super::{ExecError, ExecSpec, NamespaceConfig};

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: Option<i32>,
    pub output: Vec<u8>,
    pub duration: Duration,
    pub timed_out: bool,
}

/// Scans captured output for `[NN%]`-style progress markers, reporting the
/// last (highest-numbered) one seen — used by the scheduler's progress
/// display while a long build step runs.
pub fn last_progress_marker(output: &[u8]) -> Option<u8> {
    let text = String::from_utf8_lossy(output);
    let mut last = None;
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix('[') {
            if let Some(pct) = rest.strip_suffix("%]").and_then(|digits| digits.parse::<u8>().ok()) {
                last = Some(pct);
            }
        }
    }
    last
}

pub struct Executor;

impl Executor {
    pub async fn run(spec: &ExecSpec) -> Result<ExecOutcome, ExecError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&spec.command);
        cmd.current_dir(&spec.working_dir);
        cmd.env_clear();
        cmd.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        #[cfg(unix)]
        unsafe {
            use std::os::unix::process::CommandExt;
            let parent_pid = libc::getpid();
            let namespace = spec
                .sandboxed
                .then(|| NamespaceConfig::new(spec.working_dir.clone(), true));
            cmd.pre_exec(move || {
                if libc::setpgid(0, 0) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                #[cfg(target_os = "linux")]
                {
                    if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGHUP) == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    if libc::getppid() != parent_pid {
                        libc::raise(libc::SIGHUP);
                    }
                }
                if let Some(namespace) = &namespace {
                    namespace
                        .apply()
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
                }
                Ok(())
            });
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(ExecError::Io)?;
        let output = Arc::new(Mutex::new(Vec::new()));

        let stdout_task = spawn_capture(child.stdout.take(), Arc::clone(&output));
        let stderr_task = spawn_capture(child.stderr.take(), Arc::clone(&output));

        let timed_out = match spec.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => {
                    status.map_err(ExecError::Io)?;
                    false
                }
                Err(_) => {
                    escalate_kill(&mut child).await?;
                    true
                }
            },
            None => {
                child.wait().await.map_err(ExecError::Io)?;
                false
            }
        };

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let status = child.wait().await.map_err(ExecError::Io)?;
        let duration = start.elapsed();
        let output = Arc::try_unwrap(output)
            .map(|m| m.into_inner().unwrap_or_default())
            .unwrap_or_default();

        if timed_out {
            return Err(ExecError::DeadlineExceeded(spec.timeout.unwrap_or_default()));
        }

        Ok(ExecOutcome {
            exit_code: status.code(),
            output,
            duration,
            timed_out,
        })
    }
}

fn spawn_capture<R>(reader: Option<R>, sink: Arc<Mutex<Vec<u8>>>) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(reader) = reader else { return };
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut guard = sink.lock().unwrap_or_else(|e| e.into_inner());
            guard.extend_from_slice(line.as_bytes());
            guard.push(b'\n');
        }
    })
}

/// SIGTERM, wait 30ms, SIGTERM again, wait 1s, then SIGKILL the whole
/// process group (spec.md §4.5's literal escalation timing).
#[cfg(unix)]
async fn escalate_kill(child: &mut Child) -> Result<(), ExecError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pgid = Pid::from_raw(-(pid as i32));

    let _ = kill(pgid, Signal::SIGTERM);
    sleep(Duration::from_millis(30)).await;
    if matches!(child.try_wait(), Ok(None)) {
        let _ = kill(pgid, Signal::SIGTERM);
        sleep(Duration::from_secs(1)).await;
    }
    if matches!(child.try_wait(), Ok(None)) {
        let _ = kill(pgid, Signal::SIGKILL);
    }
    Ok(())
}

#[cfg(not(unix))]
async fn escalate_kill(child: &mut Child) -> Result<(), ExecError> {
    let _ = child.kill().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn spec(command: &str) -> ExecSpec {
        ExecSpec {
            command: command.to_string(),
            working_dir: PathBuf::from("/tmp"),
            env: vec![("PATH".to_string(), "/usr/bin:/bin".to_string())],
            timeout: Some(Duration::from_secs(5)),
            sandboxed: false,
            data_files: Vec::new(),
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let outcome = Executor::run(&spec("echo hello")).await.unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.output, b"hello\n");
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_an_error() {
        let outcome = Executor::run(&spec("exit 7")).await.unwrap();
        assert_eq!(outcome.exit_code, Some(7));
    }

    #[tokio::test]
    async fn timeout_is_reported_as_deadline_exceeded() {
        let mut s = spec("sleep 5");
        s.timeout = Some(Duration::from_millis(50));
        let err = Executor::run(&s).await.unwrap_err();
        assert!(matches!(err, ExecError::DeadlineExceeded(_)));
    }

    #[test]
    fn last_progress_marker_picks_final_line() {
        let out = b"[10%] building\n[55%] building\nother\n";
        assert_eq!(last_progress_marker(out), Some(55));
    }
}
