//! Mitigations and the patch operations that realize them.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::interpreter::{InterpreterFamily, InterpreterSpec};

/// Identifier used on the mitigation axis for "no mitigation applied".
pub const NO_MITIGATION: &str = "none";

/// A single source-level transformation applied before the native build.
///
/// Every variant is idempotent when re-applied to a tree that already carries
/// it, and fails loudly when the tree is in any other unexpected state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatchOperation {
    /// Replace the contents of an existing file.
    ReplaceFile { target: PathBuf, contents: String },

    /// Create a new file. Fails if a different file is already there.
    AddFile { target: PathBuf, contents: String },

    /// Replace the first occurrence of `find` with `replace`.
    Substitute {
        target: PathBuf,
        find: String,
        replace: String,
    },

    /// Write a header into the tree and force-include it in every
    /// translation unit through the build's flags variable.
    InjectHeader { header: PathBuf, contents: String },

    /// Append a compiler flag to the build's flags variable.
    SetBuildFlag { flag: String },
}

impl PatchOperation {
    /// File inside the tree touched by this operation, if any.
    pub fn target(&self) -> Option<&PathBuf> {
        match self {
            PatchOperation::ReplaceFile { target, .. }
            | PatchOperation::AddFile { target, .. }
            | PatchOperation::Substitute { target, .. } => Some(target),
            PatchOperation::InjectHeader { header, .. } => Some(header),
            PatchOperation::SetBuildFlag { .. } => None,
        }
    }

    /// Whether the operation contributes to the build's flags variable.
    pub fn contributes_flags(&self) -> bool {
        matches!(
            self,
            PatchOperation::InjectHeader { .. } | PatchOperation::SetBuildFlag { .. }
        )
    }

    /// Short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PatchOperation::ReplaceFile { .. } => "replace_file",
            PatchOperation::AddFile { .. } => "add_file",
            PatchOperation::Substitute { .. } => "substitute",
            PatchOperation::InjectHeader { .. } => "inject_header",
            PatchOperation::SetBuildFlag { .. } => "set_build_flag",
        }
    }
}

/// How a built variant receives the exploit payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LaunchMode {
    /// `interpreter <payload.lua>`
    #[default]
    Direct,

    /// `interpreter <tree>/<runner> < payload.lua`: a language-level guard
    /// script installed into the tree evaluates the payload.
    Guarded { runner: PathBuf },
}

/// Patch operations that apply to one group of families, optionally pinned
/// to specific interpreter versions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchSet {
    pub families: Vec<InterpreterFamily>,

    /// Interpreter ids this set is pinned to. Empty means every interpreter
    /// of the listed families.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interpreters: Vec<String>,

    pub operations: Vec<PatchOperation>,
}

impl PatchSet {
    fn pinned_to(&self, interpreter: &InterpreterSpec) -> bool {
        self.families.contains(&interpreter.family) && self.interpreters.contains(&interpreter.id)
    }

    fn generic_for(&self, family: InterpreterFamily) -> bool {
        self.families.contains(&family) && self.interpreters.is_empty()
    }
}

/// A mitigation from the static catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MitigationSpec {
    /// Catalog identifier, e.g. `stdlibrary_sandbox`.
    pub id: String,

    /// One-line description for listings.
    pub description: String,

    /// Ordered patch sets. A set pinned to the interpreter id wins over a
    /// generic set for its family; among equals the first one is used. An
    /// interpreter selected by no set is outside the mitigation's scope.
    pub patches: Vec<PatchSet>,

    /// How patched variants are launched.
    #[serde(default)]
    pub launch: LaunchMode,
}

impl MitigationSpec {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            patches: Vec::new(),
            launch: LaunchMode::Direct,
        }
    }

    /// Add a generic patch set for the given families (builder pattern).
    pub fn with_patches(
        mut self,
        families: &[InterpreterFamily],
        operations: Vec<PatchOperation>,
    ) -> Self {
        self.patches.push(PatchSet {
            families: families.to_vec(),
            interpreters: Vec::new(),
            operations,
        });
        self
    }

    /// Add a patch set pinned to specific interpreter ids (builder pattern).
    pub fn with_pinned_patches(
        mut self,
        family: InterpreterFamily,
        interpreters: &[&str],
        operations: Vec<PatchOperation>,
    ) -> Self {
        self.patches.push(PatchSet {
            families: vec![family],
            interpreters: interpreters.iter().map(|s| s.to_string()).collect(),
            operations,
        });
        self
    }

    /// Set the launch mode (builder pattern).
    pub fn with_launch(mut self, launch: LaunchMode) -> Self {
        self.launch = launch;
        self
    }

    fn select(&self, interpreter: &InterpreterSpec) -> Option<&PatchSet> {
        self.patches
            .iter()
            .find(|p| p.pinned_to(interpreter))
            .or_else(|| self.patches.iter().find(|p| p.generic_for(interpreter.family)))
    }

    /// Family-level applicability predicate.
    pub fn applies_to_family(&self, family: InterpreterFamily) -> bool {
        self.patches.iter().any(|p| p.families.contains(&family))
    }

    /// Applicability predicate for a concrete interpreter.
    pub fn applies_to(&self, interpreter: &InterpreterSpec) -> bool {
        self.select(interpreter).is_some()
    }

    /// Ordered operations for `interpreter`; empty when inapplicable.
    pub fn operations_for(&self, interpreter: &InterpreterSpec) -> &[PatchOperation] {
        self.select(interpreter)
            .map(|p| p.operations.as_slice())
            .unwrap_or(&[])
    }

    /// Families this mitigation applies to.
    pub fn families(&self) -> Vec<InterpreterFamily> {
        InterpreterFamily::ALL
            .into_iter()
            .filter(|f| self.applies_to_family(*f))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::interpreter::BuildRecipe;

    fn interp(id: &str, family: InterpreterFamily) -> InterpreterSpec {
        InterpreterSpec::new(id, family, BuildRecipe::new(["make"], "lua"))
    }

    fn ffi_off() -> MitigationSpec {
        MitigationSpec::new("disable_ffi", "compile LuaJIT without FFI").with_patches(
            &[InterpreterFamily::LuaJit],
            vec![PatchOperation::SetBuildFlag {
                flag: "-DLUAJIT_DISABLE_FFI".to_string(),
            }],
        )
    }

    #[test]
    fn test_applicability_by_family() {
        let m = ffi_off();
        assert!(m.applies_to(&interp("LuaJIT-rolling", InterpreterFamily::LuaJit)));
        assert!(!m.applies_to(&interp("lua-5.4.6", InterpreterFamily::PucLua)));
        assert_eq!(m.families(), vec![InterpreterFamily::LuaJit]);
    }

    #[test]
    fn test_operations_for_inapplicable_family_is_empty() {
        let m = ffi_off();
        assert!(m.operations_for(&interp("luau", InterpreterFamily::Luau)).is_empty());
        assert_eq!(
            m.operations_for(&interp("LuaJIT-4f8736", InterpreterFamily::LuaJit)).len(),
            1
        );
    }

    #[test]
    fn test_pinned_set_wins_over_generic() {
        let m = MitigationSpec::new("m", "")
            .with_patches(
                &[InterpreterFamily::PucLua],
                vec![PatchOperation::SetBuildFlag { flag: "-DGENERIC".into() }],
            )
            .with_pinned_patches(
                InterpreterFamily::PucLua,
                &["lua-5.1.5"],
                vec![PatchOperation::SetBuildFlag { flag: "-DPINNED".into() }],
            );
        assert_eq!(
            m.operations_for(&interp("lua-5.1.5", InterpreterFamily::PucLua)),
            &[PatchOperation::SetBuildFlag { flag: "-DPINNED".into() }]
        );
        assert_eq!(
            m.operations_for(&interp("lua-5.4.6", InterpreterFamily::PucLua)),
            &[PatchOperation::SetBuildFlag { flag: "-DGENERIC".into() }]
        );
    }

    #[test]
    fn test_pinned_only_mitigation_skips_other_versions() {
        let m = MitigationSpec::new("m", "").with_pinned_patches(
            InterpreterFamily::PucLua,
            &["lua-5.1.5"],
            vec![PatchOperation::SetBuildFlag { flag: "-DX".into() }],
        );
        assert!(m.applies_to(&interp("lua-5.1.5", InterpreterFamily::PucLua)));
        assert!(!m.applies_to(&interp("lua-5.3.6", InterpreterFamily::PucLua)));
        assert!(m.applies_to_family(InterpreterFamily::PucLua));
    }

    #[test]
    fn test_patch_operation_is_tagged() {
        let op = PatchOperation::InjectHeader {
            header: PathBuf::from("src/stdlibrary_wrapper.h"),
            contents: "#define X".to_string(),
        };
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v["kind"], "inject_header");
        assert!(op.contributes_flags());
        assert_eq!(op.target().unwrap(), &PathBuf::from("src/stdlibrary_wrapper.h"));
    }
}
