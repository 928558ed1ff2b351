//! Bounded execution of native processes.
//!
//! Every process is started as the leader of its own process group with
//! stdout/stderr redirected into anonymous capture files. Pipes are never
//! used: a grandchild that keeps a pipe open would otherwise stall the
//! reader long after the direct child exited.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use luabench_core::ProcessExit;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::debug;

use crate::error::ProcessError;

/// A fully specified process launch.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// File fed to the process on stdin; `/dev/null` otherwise.
    pub stdin: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
            envs: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

/// How the two output streams are captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// stdout and stderr share one capture file (build logs).
    Combined,
    /// Separate capture files.
    Split,
}

/// What a bounded process left behind.
#[derive(Debug, Clone)]
pub struct Finished {
    pub exit: ProcessExit,
    /// Captured stdout (or both streams with [`Capture::Combined`]).
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration_ms: u64,
}

impl Finished {
    pub fn timed_out(&self) -> bool {
        matches!(self.exit, ProcessExit::KilledOnTimeout)
    }

    pub fn success(&self) -> bool {
        matches!(self.exit, ProcessExit::Exited { code: 0 })
    }
}

/// Run `invocation` to completion or until `timeout` elapses.
///
/// On timeout the whole process group receives SIGKILL. After a normal exit
/// the group is killed as well so that lingering descendants do not outlive
/// the entry.
pub async fn run_bounded(
    invocation: &Invocation,
    timeout: Duration,
    capture: Capture,
) -> Result<Finished, ProcessError> {
    let io_err = |source: std::io::Error| ProcessError::Io {
        program: invocation.program.clone(),
        source,
    };

    let mut out = tempfile::tempfile().map_err(io_err)?;
    let mut err = match capture {
        Capture::Combined => None,
        Capture::Split => Some(tempfile::tempfile().map_err(io_err)?),
    };

    let stdin = match &invocation.stdin {
        Some(path) => Stdio::from(File::open(path).map_err(io_err)?),
        None => Stdio::null(),
    };
    let stdout = Stdio::from(out.try_clone().map_err(io_err)?);
    let stderr = match &err {
        Some(file) => Stdio::from(file.try_clone().map_err(io_err)?),
        None => Stdio::from(out.try_clone().map_err(io_err)?),
    };

    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(stderr)
        .process_group(0)
        .kill_on_drop(true);
    if let Some(cwd) = &invocation.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &invocation.envs {
        cmd.env(key, value);
    }

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: invocation.program.clone(),
        source,
    })?;
    let pgid = child.id();
    // Drop our copy of the command so its capture-file handles close.
    drop(cmd);

    let exit = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            let status = status.map_err(io_err)?;
            kill_group(pgid);
            exit_of(status)
        }
        Err(_) => {
            kill_group(pgid);
            // Reap the leader; it has already been sent SIGKILL.
            let _ = child.start_kill();
            let _ = child.wait().await;
            debug!(program = %invocation.program.display(), "killed process group on timeout");
            ProcessExit::KilledOnTimeout
        }
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    let stdout = read_capture(&mut out).map_err(io_err)?;
    let stderr = match err.as_mut() {
        Some(file) => read_capture(file).map_err(io_err)?,
        None => Vec::new(),
    };

    Ok(Finished {
        exit,
        stdout,
        stderr,
        duration_ms,
    })
}

/// Best-effort SIGKILL to a whole process group.
fn kill_group(pgid: Option<u32>) {
    let Some(pgid) = pgid else {
        return;
    };
    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => debug!(pgid = pgid, error = %e, "killpg failed"),
    }
}

fn exit_of(status: ExitStatus) -> ProcessExit {
    match (status.code(), status.signal()) {
        (Some(code), _) => ProcessExit::Exited { code },
        (None, Some(signal)) => ProcessExit::Signaled { signal },
        (None, None) => ProcessExit::Exited { code: -1 },
    }
}

fn read_capture(file: &mut File) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Last `max` bytes of a capture, lossily decoded.
pub fn tail(bytes: &[u8], max: usize) -> String {
    let start = bytes.len().saturating_sub(max);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

/// Whether `path` names an executable file for the current user.
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Invocation {
        Invocation::new("/bin/sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_run_bounded_captures_split_output() {
        let finished = run_bounded(
            &sh("echo out; echo err >&2; exit 3"),
            Duration::from_secs(10),
            Capture::Split,
        )
        .await
        .expect("run failed");

        assert_eq!(finished.exit, ProcessExit::Exited { code: 3 });
        assert_eq!(String::from_utf8_lossy(&finished.stdout), "out\n");
        assert_eq!(String::from_utf8_lossy(&finished.stderr), "err\n");
    }

    #[tokio::test]
    async fn test_run_bounded_combined_output() {
        let finished = run_bounded(
            &sh("echo one; echo two >&2"),
            Duration::from_secs(10),
            Capture::Combined,
        )
        .await
        .expect("run failed");

        assert!(finished.success());
        let log = String::from_utf8_lossy(&finished.stdout);
        assert!(log.contains("one"));
        assert!(log.contains("two"));
        assert!(finished.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_run_bounded_timeout_kills_group() {
        let start = Instant::now();
        // The background sleep inherits the capture files; the runner must
        // not wait for it.
        let finished = run_bounded(
            &sh("sleep 30 & sleep 30"),
            Duration::from_millis(200),
            Capture::Split,
        )
        .await
        .expect("run failed");

        assert!(finished.timed_out());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_run_bounded_reports_signal() {
        let finished = run_bounded(&sh("kill -SEGV $$"), Duration::from_secs(10), Capture::Split)
            .await
            .expect("run failed");

        assert_eq!(finished.exit, ProcessExit::Signaled { signal: 11 });
        assert!(finished.exit.is_abnormal());
    }

    #[tokio::test]
    async fn test_run_bounded_missing_program_is_spawn_error() {
        let err = run_bounded(
            &Invocation::new("/nonexistent/luabench/lua"),
            Duration::from_secs(1),
            Capture::Split,
        )
        .await
        .expect_err("spawn should fail");

        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_run_bounded_feeds_stdin_and_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "from-stdin\n").expect("write input");

        let finished = run_bounded(
            &sh("cat; echo \"$LUABENCH_PROBE\"")
                .stdin_file(&input)
                .env("LUABENCH_PROBE", "from-env"),
            Duration::from_secs(10),
            Capture::Split,
        )
        .await
        .expect("run failed");

        let out = String::from_utf8_lossy(&finished.stdout);
        assert!(out.contains("from-stdin"));
        assert!(out.contains("from-env"));
    }

    #[test]
    fn test_tail_keeps_last_bytes() {
        assert_eq!(tail(b"abcdef", 3), "def");
        assert_eq!(tail(b"ab", 10), "ab");
    }
}
