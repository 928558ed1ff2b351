//! luabench core
//!
//! Data model and static catalogs for the Lua exploit/mitigation benchmark:
//! interpreters and their build recipes, mitigations expressed as structured
//! patch operations, exploits with their side-effect predicates, and the
//! result records a matrix run produces.

pub mod catalog;
pub mod config;
pub mod digest;
pub mod domain;
pub mod error;
pub mod obs;
pub mod report;
pub mod telemetry;

pub use catalog::{Catalog, ExploitRegistry, PatchRegistry};
pub use config::BenchConfig;
pub use digest::Digest;
pub use domain::{
    BuildArtifact, BuildFlags, BuildRecipe, BuildStatus, ExploitSpec, InterpreterFamily,
    InterpreterSpec, LaunchMode, MitigationSpec, Outcome, PatchOperation, PatchSet, ProcessExit,
    RunEvidence, RunResult, SideEffect, Triple, VariantKey, NO_MITIGATION,
};
pub use error::{CatalogError, ConfigError, PatchError};
pub use obs::VariantSpan;
pub use report::{render_table_md, write_report_json, MatrixReport};
pub use telemetry::init_tracing;

