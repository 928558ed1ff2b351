//! luabench matrix engine
//!
//! Builds patched interpreter variants in isolated trees, runs exploit
//! payloads against them under a wall-clock limit, and aggregates one
//! outcome per (interpreter, mitigation, exploit) triple.
//!
//! ```text
//! Selection -> Matrix::run
//!                 |- VariantBuilder (memoized per cache key)
//!                 |     tree::materialize -> patcher::apply -> Toolchain
//!                 `- SandboxedRunner (EffectLocks, EffectGuard, run_bounded)
//! ```

pub mod builder;
pub mod effect;
pub mod error;
pub mod fakes;
pub mod matrix;
pub mod patcher;
pub mod process;
pub mod runner;
pub mod toolchain;
pub mod tree;

pub use builder::{BuildManifest, VariantBuilder, MANIFEST_FILE};
pub use effect::{EffectGuard, EffectLocks};
pub use error::{BuildError, MatrixError, MatrixResult, ProcessError, RunnerError};
pub use matrix::{Matrix, Selection};
pub use runner::{classify, RunReport, SandboxedRunner};
pub use toolchain::{MakeToolchain, Toolchain, ToolchainOutput};
