//! Benchmark configuration.
//!
//! Every path derives from a single working directory unless overridden:
//!
//! - `interpreters/` canonical source checkouts (populated by the download step)
//! - `temp/`         variant trees, payloads and capture files
//! - `exploited/`    directory exploits try to write into

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for a matrix run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BenchConfig {
    /// Root of all files the benchmark creates.
    pub workdir: PathBuf,

    /// Canonical interpreter source checkouts.
    pub interpreters_dir: PathBuf,

    /// Per-run scratch space.
    pub temp_dir: PathBuf,

    /// Where exploit side effects land.
    pub exploited_dir: PathBuf,

    /// Wall-clock limit for one exploit run (milliseconds).
    pub run_timeout_ms: u64,

    /// Wall-clock limit for one native build (milliseconds).
    pub build_timeout_ms: u64,

    /// Variant groups processed concurrently.
    pub jobs: usize,

    /// Keep variant trees across runs, keyed by the patch-set digest.
    pub reuse_builds: bool,

    /// Give every matrix entry its own effect directory instead of the
    /// shared `exploited_dir`.
    pub isolate_targets: bool,

    /// Bytes of interpreter stdout/stderr kept as evidence.
    pub output_tail_bytes: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self::from_workdir(".")
    }
}

impl BenchConfig {
    /// Derive every directory from `workdir`.
    pub fn from_workdir(workdir: impl AsRef<Path>) -> Self {
        let workdir = workdir.as_ref().to_path_buf();
        Self {
            interpreters_dir: workdir.join("interpreters"),
            temp_dir: workdir.join("temp"),
            exploited_dir: workdir.join("exploited"),
            workdir,
            run_timeout_ms: 10_000,
            build_timeout_ms: 30 * 60 * 1000,
            jobs: 1,
            reuse_builds: false,
            isolate_targets: false,
            output_tail_bytes: 4096,
        }
    }

    /// Load a TOML file. Directories left unset derive from its `workdir`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_workdir(path, None)
    }

    /// Load a TOML file with `workdir` taking precedence over the file's.
    /// Directories the file sets explicitly are kept.
    pub fn load_with_workdir(path: &Path, workdir: Option<&Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw, workdir).map_err(|source| match source {
            TomlOrInvalid::Toml(source) => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            TomlOrInvalid::Invalid(msg) => ConfigError::Invalid(msg),
        })
    }

    fn from_toml_str(raw: &str, workdir: Option<&Path>) -> Result<Self, TomlOrInvalid> {
        let partial: PartialConfig = toml::from_str(raw).map_err(TomlOrInvalid::Toml)?;
        let workdir = workdir
            .map(Path::to_path_buf)
            .or(partial.workdir)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut config = Self::from_workdir(workdir);
        if let Some(dir) = partial.interpreters_dir {
            config.interpreters_dir = dir;
        }
        if let Some(dir) = partial.temp_dir {
            config.temp_dir = dir;
        }
        if let Some(dir) = partial.exploited_dir {
            config.exploited_dir = dir;
        }
        if let Some(ms) = partial.run_timeout_ms {
            config.run_timeout_ms = ms;
        }
        if let Some(ms) = partial.build_timeout_ms {
            config.build_timeout_ms = ms;
        }
        if let Some(jobs) = partial.jobs {
            config.jobs = jobs;
        }
        if let Some(reuse) = partial.reuse_builds {
            config.reuse_builds = reuse;
        }
        if let Some(isolate) = partial.isolate_targets {
            config.isolate_targets = isolate;
        }
        if let Some(bytes) = partial.output_tail_bytes {
            config.output_tail_bytes = bytes;
        }
        config.validate().map_err(TomlOrInvalid::Invalid)?;
        Ok(config)
    }

    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> Result<(), String> {
        if self.jobs == 0 {
            return Err("jobs must be at least 1".to_string());
        }
        if self.run_timeout_ms == 0 {
            return Err("run_timeout_ms must be greater than zero".to_string());
        }
        if self.build_timeout_ms == 0 {
            return Err("build_timeout_ms must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Anchor relative directories at `base`. Variant trees and payloads
    /// are handed to child processes running elsewhere, so the engine only
    /// works with absolute paths.
    pub fn anchored_at(mut self, base: &Path) -> Self {
        for dir in [
            &mut self.workdir,
            &mut self.interpreters_dir,
            &mut self.temp_dir,
            &mut self.exploited_dir,
        ] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
        self
    }

    /// Render as TOML (used by `luabench show-config`).
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

enum TomlOrInvalid {
    Toml(toml::de::Error),
    Invalid(String),
}

/// On-disk shape: every field optional so derived defaults can fill gaps.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    workdir: Option<PathBuf>,
    interpreters_dir: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
    exploited_dir: Option<PathBuf>,
    run_timeout_ms: Option<u64>,
    build_timeout_ms: Option<u64>,
    jobs: Option<usize>,
    reuse_builds: Option<bool>,
    isolate_targets: Option<bool>,
    output_tail_bytes: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchored_at_makes_paths_absolute() {
        let config = BenchConfig::from_workdir("bench").anchored_at(Path::new("/srv"));
        assert_eq!(config.workdir, PathBuf::from("/srv/bench"));
        assert_eq!(config.temp_dir, PathBuf::from("/srv/bench/temp"));

        let absolute = BenchConfig::from_workdir("/data").anchored_at(Path::new("/srv"));
        assert_eq!(absolute.exploited_dir, PathBuf::from("/data/exploited"));
    }

    #[test]
    fn test_from_workdir_derives_layout() {
        let cfg = BenchConfig::from_workdir("/bench");
        assert_eq!(cfg.interpreters_dir, PathBuf::from("/bench/interpreters"));
        assert_eq!(cfg.temp_dir, PathBuf::from("/bench/temp"));
        assert_eq!(cfg.exploited_dir, PathBuf::from("/bench/exploited"));
        assert_eq!(cfg.run_timeout_ms, 10_000);
        assert_eq!(cfg.jobs, 1);
        assert!(!cfg.reuse_builds);
    }

    #[test]
    fn test_toml_overrides_and_derives() {
        let raw = r#"
            workdir = "/bench"
            exploited_dir = "/tmp/pwn"
            run_timeout_ms = 2500
            jobs = 4
        "#;
        let cfg = BenchConfig::from_toml_str(raw, None).ok().unwrap();
        assert_eq!(cfg.temp_dir, PathBuf::from("/bench/temp"));
        assert_eq!(cfg.exploited_dir, PathBuf::from("/tmp/pwn"));
        assert_eq!(cfg.run_timeout_ms, 2500);
        assert_eq!(cfg.jobs, 4);
    }

    #[test]
    fn test_explicit_workdir_beats_file_workdir() {
        let raw = r#"
            workdir = "/bench"
            exploited_dir = "/tmp/pwn"
        "#;
        let cfg = BenchConfig::from_toml_str(raw, Some(Path::new("/srv/override")))
            .ok()
            .unwrap();
        assert_eq!(cfg.workdir, PathBuf::from("/srv/override"));
        assert_eq!(cfg.interpreters_dir, PathBuf::from("/srv/override/interpreters"));
        assert_eq!(cfg.exploited_dir, PathBuf::from("/tmp/pwn"));
    }

    #[test]
    fn test_zero_jobs_rejected() {
        let result = BenchConfig::from_toml_str("jobs = 0", None);
        assert!(matches!(result, Err(TomlOrInvalid::Invalid(_))));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result = BenchConfig::from_toml_str("jobz = 2", None);
        assert!(matches!(result, Err(TomlOrInvalid::Toml(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("luabench.toml");
        std::fs::write(&path, "reuse_builds = true\nisolate_targets = true\n").unwrap();
        let cfg = BenchConfig::load(&path).unwrap();
        assert!(cfg.reuse_builds);
        assert!(cfg.isolate_targets);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = BenchConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_to_toml_roundtrips_through_load() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BenchConfig::from_workdir(dir.path());
        let path = dir.path().join("cfg.toml");
        std::fs::write(&path, cfg.to_toml().unwrap()).unwrap();
        assert_eq!(BenchConfig::load(&path).unwrap(), cfg);
    }
}
