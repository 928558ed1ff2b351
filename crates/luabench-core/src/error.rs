//! Error taxonomy for the benchmark core.

use std::path::PathBuf;

/// Configuration errors: a requested identifier is not in the static catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown interpreter: {0}")]
    UnknownInterpreter(String),

    #[error("unknown mitigation: {0}")]
    UnknownMitigation(String),

    #[error("unknown exploit: {0}")]
    UnknownExploit(String),
}

/// Errors raised while applying a patch operation to a variant tree.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("patch target does not exist: {0}")]
    MissingTarget(PathBuf),

    #[error("patch target escapes the source tree: {0}")]
    OutsideTree(PathBuf),

    #[error("patch conflict on {target}: {reason}")]
    Conflict { target: PathBuf, reason: String },

    #[error("io error while patching {target}: {source}")]
    Io {
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors loading a benchmark configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
