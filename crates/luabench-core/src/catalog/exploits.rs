//! Exploit Registry: payloads and their side-effect predicates.

use std::collections::BTreeMap;

use crate::domain::{ExploitSpec, InterpreterFamily, SideEffect};
use crate::error::CatalogError;

const STD_OS_EXECUTE: &str = include_str!("../../assets/exploits/std_os_execute.lua");
const STD_IO_WRITE: &str = include_str!("../../assets/exploits/std_io_write.lua");
const BYTECODE_DUMP_LOAD: &str = include_str!("../../assets/exploits/bytecode_dump_load.lua");
const FFI_LOAD: &str = include_str!("../../assets/exploits/ffi_load.lua");

/// Lookup table of exploits by identifier.
#[derive(Debug, Clone, Default)]
pub struct ExploitRegistry {
    exploits: BTreeMap<String, ExploitSpec>,
    order: Vec<String>,
}

impl ExploitRegistry {
    pub fn new(specs: impl IntoIterator<Item = ExploitSpec>) -> Self {
        let mut registry = Self::default();
        for spec in specs {
            registry.insert(spec);
        }
        registry
    }

    /// The builtin exploit catalog.
    pub fn builtin() -> Self {
        Self::new(builtin_exploits())
    }

    /// Register (or replace) an exploit.
    pub fn insert(&mut self, spec: ExploitSpec) {
        if !self.exploits.contains_key(&spec.id) {
            self.order.push(spec.id.clone());
        }
        self.exploits.insert(spec.id.clone(), spec);
    }

    pub fn lookup(&self, id: &str) -> Result<&ExploitSpec, CatalogError> {
        self.exploits
            .get(id)
            .ok_or_else(|| CatalogError::UnknownExploit(id.to_string()))
    }

    /// Applicability predicate over the interpreter family.
    pub fn applicable(&self, exploit: &ExploitSpec, family: InterpreterFamily) -> bool {
        exploit.applies_to(family)
    }

    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExploitSpec> {
        self.order.iter().filter_map(|id| self.exploits.get(id))
    }
}

/// Benign stand-ins for the benchmark's proofs-of-concept: each one attempts
/// the same unauthorized write through a different API path.
pub fn builtin_exploits() -> Vec<ExploitSpec> {
    let std_families = [InterpreterFamily::PucLua, InterpreterFamily::LuaJit];
    vec![
        ExploitSpec::new(
            "std_os_execute",
            "spawn a shell through os.execute",
            &std_families,
            STD_OS_EXECUTE,
            SideEffect::new("std_os_execute.txt", "exploited-by-os-execute"),
        ),
        ExploitSpec::new(
            "std_io_write",
            "write a file through the io library",
            &std_families,
            STD_IO_WRITE,
            SideEffect::new("std_io_write.txt", "exploited-by-io-write"),
        ),
        ExploitSpec::new(
            "bytecode_dump_load",
            "load a precompiled chunk that writes a file",
            &std_families,
            BYTECODE_DUMP_LOAD,
            SideEffect::new("bytecode_dump_load.txt", "exploited-by-bytecode"),
        ),
        ExploitSpec::new(
            "ffi_load",
            "call libc fopen/fputs through the FFI",
            &[InterpreterFamily::LuaJit],
            FFI_LOAD,
            SideEffect::new("ffi_load.txt", "exploited-by-ffi"),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_lookup_known_and_unknown() {
        let registry = ExploitRegistry::builtin();
        assert_eq!(registry.lookup("ffi_load").unwrap().id, "ffi_load");
        assert_eq!(
            registry.lookup("bytecode_corsix").unwrap_err(),
            CatalogError::UnknownExploit("bytecode_corsix".to_string())
        );
    }

    #[test]
    fn test_ffi_only_applies_to_luajit() {
        let registry = ExploitRegistry::builtin();
        let ffi = registry.lookup("ffi_load").unwrap();
        assert!(registry.applicable(ffi, InterpreterFamily::LuaJit));
        assert!(!registry.applicable(ffi, InterpreterFamily::PucLua));
        assert!(!registry.applicable(ffi, InterpreterFamily::Luau));
    }

    #[test]
    fn test_every_payload_renders_both_placeholders() {
        let registry = ExploitRegistry::builtin();
        for exploit in registry.iter() {
            let rendered = exploit.render(Path::new("/tmp/exploited/out.txt"));
            assert!(rendered.contains("/tmp/exploited/out.txt"), "{}", exploit.id);
            assert!(rendered.contains(&exploit.effect.marker), "{}", exploit.id);
        }
    }

    #[test]
    fn test_os_execute_quotes_target_for_the_shell() {
        let registry = ExploitRegistry::builtin();
        let exploit = registry.lookup("std_os_execute").unwrap();
        let rendered = exploit.render(Path::new("/tmp/it's here/out.txt"));
        assert!(rendered.contains("shell_quote(\"/tmp/it's here/out.txt\")"));
        assert!(!rendered.contains("> '"));
    }

    #[test]
    fn test_side_effect_files_are_distinct() {
        let registry = ExploitRegistry::builtin();
        let mut files: Vec<_> = registry.iter().map(|e| e.effect.file.clone()).collect();
        let before = files.len();
        files.sort();
        files.dedup();
        assert_eq!(files.len(), before);
    }
}
