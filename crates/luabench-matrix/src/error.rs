//! Error types for the matrix engine.

use std::path::PathBuf;

use luabench_core::CatalogError;

/// Errors from launching and supervising a native process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The process could not be started (missing binary, permission denied).
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error while supervising {program}: {source}")]
    Io {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from a native build invocation. Always folded into a failed
/// artifact, never propagated out of the builder.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("build command is empty")]
    EmptyCommand,

    #[error("build timed out after {limit_ms}ms")]
    TimedOut { limit_ms: u64 },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Errors that prevent the runner from producing a trustworthy outcome.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("variant {0} has no executable; failed builds must not reach the runner")]
    NotBuilt(String),

    #[error("stale side effect at {path} could not be removed: {source}")]
    StaleEvidence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("side effect at {path} could not be cleaned up: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort a whole matrix run before any entry executes.
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("empty selection: {0}")]
    EmptySelection(&'static str),
}

/// Result type for matrix-level operations.
pub type MatrixResult<T> = std::result::Result<T, MatrixError>;
