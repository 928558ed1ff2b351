//! In-memory toolchain fakes for tests.
//!
//! `ScriptToolchain` never runs a compiler: it writes a `/bin/sh` script to
//! the recipe's executable path, choosing the script from the flags the
//! build was invoked with, and counts invocations.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BuildError;
use crate::toolchain::{Toolchain, ToolchainOutput};

/// A shell interpreter that runs its first argument as a script, like
/// `lua payload.lua` would.
pub const SH_INTERPRETER: &str = "#!/bin/sh\nexec /bin/sh \"$@\"\n";

/// Fake native build writing a shell script as the "interpreter".
pub struct ScriptToolchain {
    executable: PathBuf,
    default_script: String,
    /// (substring of argv, script) pairs; first match wins.
    rules: Vec<(String, String)>,
    fail: bool,
    delay: Duration,
    calls: AtomicUsize,
    invocations: Mutex<Vec<Vec<String>>>,
}

impl ScriptToolchain {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            executable: PathBuf::from("src/lua"),
            default_script: script.into(),
            rules: Vec::new(),
            fail: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// A build that always exits non-zero.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }

    pub fn with_executable(mut self, rel: impl Into<PathBuf>) -> Self {
        self.executable = rel.into();
        self
    }

    /// Use `script` when any argv element contains `needle`.
    pub fn when_argv_contains(mut self, needle: impl Into<String>, script: impl Into<String>) -> Self {
        self.rules.push((needle.into(), script.into()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of builds invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every argv the toolchain received.
    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().unwrap().clone()
    }

    fn script_for(&self, argv: &[String]) -> &str {
        self.rules
            .iter()
            .find(|(needle, _)| argv.iter().any(|a| a.contains(needle.as_str())))
            .map(|(_, script)| script.as_str())
            .unwrap_or(&self.default_script)
    }
}

#[async_trait]
impl Toolchain for ScriptToolchain {
    async fn build(
        &self,
        tree: &Path,
        argv: &[String],
        _timeout: Duration,
    ) -> Result<ToolchainOutput, BuildError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.invocations.lock().unwrap().push(argv.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.fail {
            return Ok(ToolchainOutput {
                exit_code: Some(2),
                log: "make: *** [lua] Error 1".to_string(),
                duration_ms: 0,
            });
        }

        let exe = tree.join(&self.executable);
        write_script(&exe, self.script_for(argv)).map_err(|source| {
            BuildError::Process(crate::error::ProcessError::Io {
                program: exe.clone(),
                source,
            })
        })?;

        Ok(ToolchainOutput {
            exit_code: Some(0),
            log: format!("fake build of {}", exe.display()),
            duration_ms: 0,
        })
    }
}

/// Write an executable script, creating parent directories.
pub fn write_script(path: &Path, script: &str) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, script)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_toolchain_picks_rule_by_flags() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = ScriptToolchain::new(SH_INTERPRETER)
            .when_argv_contains("stdlibrary_wrapper.h", "#!/bin/sh\nexit 0\n");

        let argv = vec![
            "make".to_string(),
            "MYCFLAGS=-include /t/src/stdlibrary_wrapper.h".to_string(),
        ];
        let out = toolchain
            .build(dir.path(), &argv, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(out.success());
        assert_eq!(toolchain.calls(), 1);
        let script = std::fs::read_to_string(dir.path().join("src/lua")).unwrap();
        assert_eq!(script, "#!/bin/sh\nexit 0\n");
        assert_eq!(toolchain.invocations(), vec![argv]);
    }

    #[tokio::test]
    async fn test_failing_toolchain() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = ScriptToolchain::failing();
        let out = toolchain
            .build(dir.path(), &["make".to_string()], Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!out.success());
        assert!(!dir.path().join("src/lua").exists());
    }
}
