//! Per-triple outcomes and the evidence they were derived from.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::artifact::VariantKey;

/// One cell of the benchmark matrix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Triple {
    pub interpreter: String,
    pub mitigation: Option<String>,
    pub exploit: String,
}

impl Triple {
    pub fn new(
        interpreter: impl Into<String>,
        exploit: impl Into<String>,
        mitigation: Option<String>,
    ) -> Self {
        Self {
            interpreter: interpreter.into(),
            mitigation,
            exploit: exploit.into(),
        }
    }

    pub fn variant(&self) -> VariantKey {
        VariantKey::new(self.interpreter.clone(), self.mitigation.clone())
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.variant().label(), self.exploit)
    }
}

/// Classification of a matrix entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The side effect was observed.
    ExploitSucceeded,
    /// A mitigation was applied and the side effect was not observed.
    Mitigated,
    /// No mitigation, clean exit, no side effect.
    NotExploited,
    /// No mitigation, terminated by a signal, no side effect. Needs triage.
    Crashed,
    /// Killed after exceeding the wall-clock limit, no side effect.
    TimedOut,
    /// The interpreter process could not be started.
    LaunchFailed,
    /// The variant did not build.
    BuildFailed,
    /// Exploit or mitigation is not meaningful for the interpreter family.
    Inapplicable,
    /// The harness could not guarantee a clean observation (stale evidence).
    HarnessFault,
}

impl Outcome {
    pub const ALL: [Outcome; 9] = [
        Outcome::ExploitSucceeded,
        Outcome::Mitigated,
        Outcome::NotExploited,
        Outcome::Crashed,
        Outcome::TimedOut,
        Outcome::LaunchFailed,
        Outcome::BuildFailed,
        Outcome::Inapplicable,
        Outcome::HarnessFault,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Outcome::ExploitSucceeded => "exploit_succeeded",
            Outcome::Mitigated => "mitigated",
            Outcome::NotExploited => "not_exploited",
            Outcome::Crashed => "crashed",
            Outcome::TimedOut => "timed_out",
            Outcome::LaunchFailed => "launch_failed",
            Outcome::BuildFailed => "build_failed",
            Outcome::Inapplicable => "inapplicable",
            Outcome::HarnessFault => "harness_fault",
        }
    }

    /// Whether the exploit's side effect was observed.
    pub fn exploited(&self) -> bool {
        matches!(self, Outcome::ExploitSucceeded)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the interpreter process ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessExit {
    Exited { code: i32 },
    Signaled { signal: i32 },
    KilledOnTimeout,
}

impl ProcessExit {
    /// Ended by a signal the harness did not send.
    pub fn is_abnormal(&self) -> bool {
        matches!(self, ProcessExit::Signaled { .. })
    }
}

/// Raw observations behind an outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunEvidence {
    pub exit: ProcessExit,
    pub effect_observed: bool,
    pub duration_ms: u64,
    /// Last bytes of the interpreter's stdout.
    pub stdout_tail: String,
    /// Last bytes of the interpreter's stderr.
    pub stderr_tail: String,
}

/// Immutable record for one triple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunResult {
    pub triple: Triple,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<RunEvidence>,
    /// Human-readable reason for outcomes without evidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl RunResult {
    pub fn new(triple: Triple, outcome: Outcome) -> Self {
        Self {
            triple,
            outcome,
            evidence: None,
            detail: None,
        }
    }

    pub fn with_evidence(mut self, evidence: RunEvidence) -> Self {
        self.evidence = Some(evidence);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
