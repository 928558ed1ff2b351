//! Domain model: interpreters, mitigations, exploits, artifacts, outcomes.

pub mod artifact;
pub mod exploit;
pub mod interpreter;
pub mod mitigation;
pub mod outcome;

pub use artifact::{BuildArtifact, BuildStatus, VariantKey};
pub use exploit::{ExploitSpec, SideEffect, MARKER_PLACEHOLDER, TARGET_PLACEHOLDER};
pub use interpreter::{BuildFlags, BuildRecipe, InterpreterFamily, InterpreterSpec, TREE_PLACEHOLDER};
pub use mitigation::{LaunchMode, MitigationSpec, PatchOperation, PatchSet, NO_MITIGATION};
pub use outcome::{Outcome, ProcessExit, RunEvidence, RunResult, Triple};
