//! The native build seam.
//!
//! The builder never shells out directly; it hands a rendered argv to a
//! [`Toolchain`]. Production uses [`MakeToolchain`], tests swap in the fakes
//! from [`crate::fakes`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::BuildError;
use crate::process::{run_bounded, Capture, Invocation};

/// What a native build produced.
#[derive(Debug, Clone)]
pub struct ToolchainOutput {
    /// Exit code; `None` when the build was terminated by a signal.
    pub exit_code: Option<i32>,

    /// Combined stdout/stderr.
    pub log: String,

    pub duration_ms: u64,
}

impl ToolchainOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a rendered build command inside a variant tree.
#[async_trait]
pub trait Toolchain: Send + Sync {
    async fn build(
        &self,
        tree: &Path,
        argv: &[String],
        timeout: Duration,
    ) -> Result<ToolchainOutput, BuildError>;
}

/// Executes the recipe argv (typically `make ...`) as a bounded process.
#[derive(Debug, Default, Clone)]
pub struct MakeToolchain;

#[async_trait]
impl Toolchain for MakeToolchain {
    async fn build(
        &self,
        tree: &Path,
        argv: &[String],
        timeout: Duration,
    ) -> Result<ToolchainOutput, BuildError> {
        let (program, args) = argv.split_first().ok_or(BuildError::EmptyCommand)?;
        debug!(tree = %tree.display(), argv = ?argv, "invoking native build");

        let invocation = Invocation::new(program)
            .args(args.iter().cloned())
            .current_dir(tree);
        let finished = run_bounded(&invocation, timeout, Capture::Combined).await?;

        if finished.timed_out() {
            return Err(BuildError::TimedOut {
                limit_ms: timeout.as_millis() as u64,
            });
        }

        let exit_code = match finished.exit {
            luabench_core::ProcessExit::Exited { code } => Some(code),
            _ => None,
        };

        Ok(ToolchainOutput {
            exit_code,
            log: String::from_utf8_lossy(&finished.stdout).into_owned(),
            duration_ms: finished.duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_make_toolchain_runs_in_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = MakeToolchain
            .build(
                dir.path(),
                &argv(&["/bin/sh", "-c", "touch built.txt; echo compiling"]),
                Duration::from_secs(10),
            )
            .await
            .expect("build failed");

        assert!(output.success());
        assert!(output.log.contains("compiling"));
        assert!(dir.path().join("built.txt").exists());
    }

    #[tokio::test]
    async fn test_make_toolchain_failure_exit_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = MakeToolchain
            .build(
                dir.path(),
                &argv(&["/bin/sh", "-c", "echo 'error: ldo.c' >&2; exit 2"]),
                Duration::from_secs(10),
            )
            .await
            .expect("build should run");

        assert!(!output.success());
        assert_eq!(output.exit_code, Some(2));
        assert!(output.log.contains("ldo.c"));
    }

    #[tokio::test]
    async fn test_make_toolchain_empty_command() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = MakeToolchain
            .build(dir.path(), &[], Duration::from_secs(1))
            .await
            .expect_err("empty command");
        assert!(matches!(err, BuildError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_make_toolchain_timeout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = MakeToolchain
            .build(
                dir.path(),
                &argv(&["/bin/sh", "-c", "sleep 30"]),
                Duration::from_millis(100),
            )
            .await
            .expect_err("should time out");
        assert!(matches!(err, BuildError::TimedOut { limit_ms: 100 }));
    }
}
