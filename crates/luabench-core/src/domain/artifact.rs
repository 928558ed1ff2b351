//! Interpreter variants and their build artifacts.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// An (interpreter, mitigation) build combination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantKey {
    pub interpreter: String,
    pub mitigation: Option<String>,
}

impl VariantKey {
    pub fn new(interpreter: impl Into<String>, mitigation: Option<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            mitigation,
        }
    }

    /// `lua-5.4.6` or `lua-5.4.6_stdlibrary_sandbox`.
    pub fn label(&self) -> String {
        match &self.mitigation {
            Some(m) => format!("{}_{}", self.interpreter, m),
            None => self.interpreter.clone(),
        }
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Result of the native build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildStatus {
    Succeeded { executable: PathBuf },
    Failed,
}

/// A built (or failed) interpreter variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildArtifact {
    /// Which variant this is.
    pub variant: VariantKey,

    /// Content cache key over interpreter, recipe and full patch set.
    pub cache_key: Digest,

    /// Materialized source tree the build ran in.
    pub tree: PathBuf,

    /// Build outcome.
    pub status: BuildStatus,

    /// Combined stdout/stderr of the build, plus harness diagnostics.
    pub log: String,

    /// Guard script the payload is fed through, for guarded launches.
    pub guard: Option<PathBuf>,

    /// Build wall time in milliseconds (0 for a persistent cache hit).
    pub duration_ms: u64,
}

impl BuildArtifact {
    /// Executable path if the build succeeded.
    pub fn executable(&self) -> Option<&PathBuf> {
        match &self.status {
            BuildStatus::Succeeded { executable } => Some(executable),
            BuildStatus::Failed => None,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, BuildStatus::Succeeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_label() {
        assert_eq!(VariantKey::new("luau", None).label(), "luau");
        assert_eq!(
            VariantKey::new("LuaJIT-rolling", Some("disable_ffi".into())).label(),
            "LuaJIT-rolling_disable_ffi"
        );
    }

    #[test]
    fn test_failed_artifact_has_no_executable() {
        let artifact = BuildArtifact {
            variant: VariantKey::new("lua-5.1.5", None),
            cache_key: Digest::compute(b"k"),
            tree: PathBuf::from("/t"),
            status: BuildStatus::Failed,
            log: "make: *** [all] Error 2".to_string(),
            guard: None,
            duration_ms: 5,
        };
        assert!(!artifact.succeeded());
        assert!(artifact.executable().is_none());
    }
}
