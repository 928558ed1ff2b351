//! Sandboxed runner: launch one exploit against one built variant and
//! classify what happened.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use luabench_core::obs::emit_cleanup_error;
use luabench_core::{BenchConfig, BuildArtifact, ExploitSpec, Outcome, ProcessExit, RunEvidence};
use tracing::debug;
use uuid::Uuid;

use crate::effect::{EffectGuard, EffectLocks};
use crate::error::{ProcessError, RunnerError};
use crate::process::{run_bounded, tail, Capture, Invocation};

/// Outcome of a single run plus the raw observations behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: Outcome,
    pub evidence: Option<RunEvidence>,
    pub detail: Option<String>,
}

/// Map raw observations to an outcome.
///
/// An observed side effect always wins, even when the process later timed
/// out or crashed: the write happened.
pub fn classify(effect_observed: bool, exit: ProcessExit, mitigated: bool) -> Outcome {
    if effect_observed {
        return Outcome::ExploitSucceeded;
    }
    match exit {
        ProcessExit::KilledOnTimeout => Outcome::TimedOut,
        _ if mitigated => Outcome::Mitigated,
        ProcessExit::Signaled { .. } => Outcome::Crashed,
        ProcessExit::Exited { .. } => Outcome::NotExploited,
    }
}

fn detail_for(outcome: Outcome, exit: ProcessExit, timeout: Duration) -> Option<String> {
    match (outcome, exit) {
        (Outcome::TimedOut, _) => Some(format!(
            "process group killed after {}ms",
            timeout.as_millis()
        )),
        (Outcome::Crashed, ProcessExit::Signaled { signal }) => Some(format!(
            "terminated by signal {signal} without side effect; needs manual triage"
        )),
        _ => None,
    }
}

/// Runs exploit payloads under a wall-clock limit in their own process
/// group.
pub struct SandboxedRunner {
    timeout: Duration,
    tail_bytes: usize,
    payload_dir: PathBuf,
    locks: Arc<EffectLocks>,
}

impl SandboxedRunner {
    pub fn new(config: &BenchConfig, run_id: Uuid, locks: Arc<EffectLocks>) -> Self {
        Self {
            timeout: Duration::from_millis(config.run_timeout_ms),
            tail_bytes: config.output_tail_bytes,
            payload_dir: config.temp_dir.join(run_id.to_string()).join("payloads"),
            locks,
        }
    }

    /// Run `exploit` against a successfully built `artifact`.
    ///
    /// The exploit's declared target lives in `effect_dir`. It is removed
    /// before launch and again before returning, whatever the outcome.
    pub async fn run(
        &self,
        artifact: &BuildArtifact,
        exploit: &ExploitSpec,
        mitigated: bool,
        effect_dir: &Path,
    ) -> Result<RunReport, RunnerError> {
        let executable = artifact
            .executable()
            .ok_or_else(|| RunnerError::NotBuilt(artifact.variant.label()))?;

        tokio::fs::create_dir_all(effect_dir).await?;
        tokio::fs::create_dir_all(&self.payload_dir).await?;
        let target = exploit
            .effect
            .path_in(&tokio::fs::canonicalize(effect_dir).await?);

        let _lock = self.locks.acquire(&target).await;
        let mut guard = EffectGuard::prepare(target.clone()).await?;

        let payload = tempfile::Builder::new()
            .prefix(&format!("{}-", exploit.id))
            .suffix(".lua")
            .tempfile_in(&self.payload_dir)?;
        tokio::fs::write(payload.path(), exploit.render(&target)).await?;

        let invocation = match &artifact.guard {
            Some(script) => Invocation::new(executable)
                .args([script.to_string_lossy().into_owned()])
                .stdin_file(payload.path())
                .env("LUA_PATH", format!("{}/?.lua;;", artifact.tree.display())),
            None => Invocation::new(executable).args([payload.path().to_string_lossy().into_owned()]),
        }
        .current_dir(&self.payload_dir);

        debug!(
            variant = %artifact.variant,
            exploit = %exploit.id,
            target = %target.display(),
            "launching payload"
        );

        let finished = match run_bounded(&invocation, self.timeout, Capture::Split).await {
            Ok(finished) => finished,
            Err(ProcessError::Spawn { program, source }) => {
                guard.cleanup().await?;
                return Ok(RunReport {
                    outcome: Outcome::LaunchFailed,
                    evidence: None,
                    detail: Some(format!("failed to launch {}: {source}", program.display())),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let effect_observed = guard.observe(&exploit.effect).await;
        let outcome = classify(effect_observed, finished.exit, mitigated);
        guard.cleanup().await?;

        if let Err(e) = payload.close() {
            emit_cleanup_error(&self.payload_dir, &e);
        }

        Ok(RunReport {
            outcome,
            detail: detail_for(outcome, finished.exit, self.timeout),
            evidence: Some(RunEvidence {
                exit: finished.exit,
                effect_observed,
                duration_ms: finished.duration_ms,
                stdout_tail: tail(&finished.stdout, self.tail_bytes),
                stderr_tail: tail(&finished.stderr, self.tail_bytes),
            }),
        })
    }
}
