//! Patch Registry: mitigations and their source-level transformations.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::domain::{
    InterpreterFamily, InterpreterSpec, LaunchMode, MitigationSpec, PatchOperation,
};
use crate::error::CatalogError;

const STDLIBRARY_WRAPPER_H: &str = include_str!("../../assets/patches/stdlibrary_wrapper.h");
const SANDBOX_RUNNER_LUA: &str = include_str!("../../assets/guards/sandbox_runner.lua");

/// Lookup table of mitigations by identifier.
///
/// All lookups are pure; nothing here touches the filesystem.
#[derive(Debug, Clone, Default)]
pub struct PatchRegistry {
    mitigations: BTreeMap<String, MitigationSpec>,
    order: Vec<String>,
}

impl PatchRegistry {
    /// Build a registry from explicit specs. Later duplicates replace earlier
    /// ones but keep their listing position.
    pub fn new(specs: impl IntoIterator<Item = MitigationSpec>) -> Self {
        let mut registry = Self::default();
        for spec in specs {
            registry.insert(spec);
        }
        registry
    }

    /// The builtin mitigation catalog.
    pub fn builtin() -> Self {
        Self::new(builtin_mitigations())
    }

    /// Register (or replace) a mitigation.
    pub fn insert(&mut self, spec: MitigationSpec) {
        if !self.mitigations.contains_key(&spec.id) {
            self.order.push(spec.id.clone());
        }
        self.mitigations.insert(spec.id.clone(), spec);
    }

    /// Look up a mitigation by identifier.
    pub fn lookup(&self, id: &str) -> Result<&MitigationSpec, CatalogError> {
        self.mitigations
            .get(id)
            .ok_or_else(|| CatalogError::UnknownMitigation(id.to_string()))
    }

    /// Ordered patch operations of `mitigation_id` for `interpreter`, or an
    /// empty list when the mitigation does not apply to it.
    pub fn patches_for(
        &self,
        interpreter: &InterpreterSpec,
        mitigation_id: &str,
    ) -> Result<Vec<PatchOperation>, CatalogError> {
        let spec = self.lookup(mitigation_id)?;
        Ok(spec.operations_for(interpreter).to_vec())
    }

    /// Applicability predicate.
    pub fn applicable(&self, mitigation: &MitigationSpec, interpreter: &InterpreterSpec) -> bool {
        mitigation.applies_to(interpreter)
    }

    /// Identifiers in listing order.
    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Specs in listing order.
    pub fn iter(&self) -> impl Iterator<Item = &MitigationSpec> {
        self.order.iter().filter_map(|id| self.mitigations.get(id))
    }
}

/// The four mitigations of the benchmark.
pub fn builtin_mitigations() -> Vec<MitigationSpec> {
    vec![
        MitigationSpec::new(
            "disable_bytecode",
            "reject precompiled chunks in the chunk loader",
        )
        .with_pinned_patches(
            InterpreterFamily::PucLua,
            &["lua-5.1.5"],
            vec![PatchOperation::Substitute {
                target: PathBuf::from("src/ldo.c"),
                find: "int c = luaZ_lookahead(p->z);".to_string(),
                replace: "int c = luaZ_lookahead(p->z);\n  if (c == LUA_SIGNATURE[0]) luaG_runerror(L, \"binary chunks are disabled\");".to_string(),
            }],
        )
        .with_patches(
            &[InterpreterFamily::PucLua],
            vec![PatchOperation::Substitute {
                target: PathBuf::from("src/ldo.c"),
                find: "checkmode(L, p->mode, \"binary\");".to_string(),
                replace: "checkmode(L, \"t\", \"binary\");".to_string(),
            }],
        )
        .with_patches(
            &[InterpreterFamily::LuaJit],
            vec![PatchOperation::Substitute {
                target: PathBuf::from("src/lj_load.c"),
                find: "if (ls->mode && !strchr(ls->mode, bc ? 'b' : 't')) {".to_string(),
                replace: "if (bc || (ls->mode && !strchr(ls->mode, bc ? 'b' : 't'))) {"
                    .to_string(),
            }],
        ),
        MitigationSpec::new("disable_ffi", "compile LuaJIT without its FFI module").with_patches(
            &[InterpreterFamily::LuaJit],
            vec![PatchOperation::SetBuildFlag {
                flag: "-DLUAJIT_DISABLE_FFI".to_string(),
            }],
        ),
        MitigationSpec::new(
            "stdlibrary_sandbox",
            "redirect fwrite and system to sandboxed wrappers",
        )
        .with_patches(
            &[InterpreterFamily::PucLua, InterpreterFamily::LuaJit],
            vec![PatchOperation::InjectHeader {
                header: PathBuf::from("src/stdlibrary_wrapper.h"),
                contents: STDLIBRARY_WRAPPER_H.to_string(),
            }],
        ),
        MitigationSpec::new(
            "kikito_sandbox",
            "evaluate the payload inside a restricted Lua environment",
        )
        .with_patches(
            &[InterpreterFamily::PucLua, InterpreterFamily::LuaJit],
            vec![PatchOperation::AddFile {
                target: PathBuf::from("runner.lua"),
                contents: SANDBOX_RUNNER_LUA.to_string(),
            }],
        )
        .with_launch(LaunchMode::Guarded {
            runner: PathBuf::from("runner.lua"),
        }),
    ]
}
