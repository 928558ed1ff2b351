//! Static catalog: interpreters, mitigations and exploits known to a run.

pub mod exploits;
pub mod interpreters;
pub mod mitigations;

pub use exploits::{builtin_exploits, ExploitRegistry};
pub use interpreters::builtin_interpreters;
pub use mitigations::{builtin_mitigations, PatchRegistry};

use crate::domain::{ExploitSpec, InterpreterSpec, MitigationSpec, NO_MITIGATION};
use crate::error::CatalogError;

/// Everything a matrix run can select from. Immutable once a run starts.
#[derive(Debug, Clone)]
pub struct Catalog {
    interpreters: Vec<InterpreterSpec>,
    pub mitigations: PatchRegistry,
    pub exploits: ExploitRegistry,
}

impl Catalog {
    pub fn new(
        interpreters: Vec<InterpreterSpec>,
        mitigations: PatchRegistry,
        exploits: ExploitRegistry,
    ) -> Self {
        Self {
            interpreters,
            mitigations,
            exploits,
        }
    }

    /// The builtin catalog.
    pub fn builtin() -> Self {
        Self::new(
            builtin_interpreters(),
            PatchRegistry::builtin(),
            ExploitRegistry::builtin(),
        )
    }

    pub fn interpreter(&self, id: &str) -> Result<&InterpreterSpec, CatalogError> {
        self.interpreters
            .iter()
            .find(|i| i.id == id)
            .ok_or_else(|| CatalogError::UnknownInterpreter(id.to_string()))
    }

    pub fn interpreters(&self) -> &[InterpreterSpec] {
        &self.interpreters
    }

    pub fn interpreter_ids(&self) -> Vec<String> {
        self.interpreters.iter().map(|i| i.id.clone()).collect()
    }

    pub fn exploit(&self, id: &str) -> Result<&ExploitSpec, CatalogError> {
        self.exploits.lookup(id)
    }

    /// Resolve a mitigation-axis identifier; `none` maps to `Ok(None)`.
    pub fn mitigation(&self, id: &str) -> Result<Option<&MitigationSpec>, CatalogError> {
        if id == NO_MITIGATION {
            return Ok(None);
        }
        self.mitigations.lookup(id).map(Some)
    }
}
