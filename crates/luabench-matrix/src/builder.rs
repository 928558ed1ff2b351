//! Variant builder: isolated tree, patches, native build, memoized per key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use luabench_core::obs::{emit_build_finished, emit_build_started};
use luabench_core::{
    BenchConfig, BuildArtifact, BuildFlags, BuildStatus, CatalogError, Digest, InterpreterSpec,
    LaunchMode, MitigationSpec, PatchOperation, PatchRegistry, VariantKey, VariantSpan,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::patcher;
use crate::process::is_executable;
use crate::toolchain::Toolchain;
use crate::tree;

/// Manifest written into a persistent variant tree.
pub const MANIFEST_FILE: &str = "luabench-build.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildManifest {
    pub cache_key: Digest,
    pub variant: VariantKey,
    pub executable: PathBuf,
    pub built_at: DateTime<Utc>,
}

type Slot = Arc<OnceCell<Arc<BuildArtifact>>>;

/// Builds interpreter variants, at most once per cache key.
pub struct VariantBuilder {
    patches: PatchRegistry,
    interpreters_dir: PathBuf,
    variants_dir: PathBuf,
    build_timeout: Duration,
    reuse_builds: bool,
    toolchain: Arc<dyn Toolchain>,
    cache: Mutex<HashMap<Digest, Slot>>,
    native_builds: AtomicUsize,
}

impl VariantBuilder {
    pub fn new(
        config: &BenchConfig,
        run_id: Uuid,
        patches: PatchRegistry,
        toolchain: Arc<dyn Toolchain>,
    ) -> Self {
        let variants_dir = if config.reuse_builds {
            config.temp_dir.join("variants")
        } else {
            config.temp_dir.join(run_id.to_string()).join("variants")
        };
        Self {
            patches,
            interpreters_dir: config.interpreters_dir.clone(),
            variants_dir,
            build_timeout: Duration::from_millis(config.build_timeout_ms),
            reuse_builds: config.reuse_builds,
            toolchain,
            cache: Mutex::new(HashMap::new()),
            native_builds: AtomicUsize::new(0),
        }
    }

    /// Forget memoized artifacts whose trees are about to be removed.
    pub async fn forget_builds(&self) {
        self.cache.lock().await.clear();
    }

    /// Number of native build invocations so far.
    pub fn native_builds(&self) -> usize {
        self.native_builds.load(Ordering::SeqCst)
    }

    /// Content key over everything that determines the built binary.
    pub fn cache_key(
        interpreter: &InterpreterSpec,
        mitigation: Option<&MitigationSpec>,
        ops: &[PatchOperation],
    ) -> Digest {
        let recipe = serde_json::to_string(&interpreter.recipe).unwrap_or_default();
        let patches = serde_json::to_string(ops).unwrap_or_default();
        let launch = mitigation
            .map(|m| serde_json::to_string(&m.launch).unwrap_or_default())
            .unwrap_or_default();
        let source = interpreter.source_dir.to_string_lossy();
        Digest::of_parts([
            interpreter.id.as_bytes(),
            interpreter.family.name().as_bytes(),
            source.as_bytes(),
            recipe.as_bytes(),
            mitigation.map(|m| m.id.as_str()).unwrap_or("none").as_bytes(),
            patches.as_bytes(),
            launch.as_bytes(),
        ])
    }

    /// Build (or fetch the memoized build of) an interpreter variant.
    ///
    /// Only an unknown mitigation identifier is an error; every problem with
    /// the build itself is reported through a failed artifact.
    pub async fn build(
        &self,
        interpreter: &InterpreterSpec,
        mitigation: Option<&str>,
    ) -> Result<Arc<BuildArtifact>, CatalogError> {
        let (spec, ops) = match mitigation {
            Some(id) => (
                Some(self.patches.lookup(id)?),
                self.patches.patches_for(interpreter, id)?,
            ),
            None => (None, Vec::new()),
        };
        let variant = VariantKey::new(interpreter.id.clone(), mitigation.map(str::to_string));
        let key = Self::cache_key(interpreter, spec, &ops);

        let slot = {
            let mut cache = self.cache.lock().await;
            cache.entry(key).or_default().clone()
        };

        let artifact = slot
            .get_or_init(|| async move {
                Arc::new(self.build_uncached(interpreter, spec, ops, variant, key).await)
            })
            .await;
        Ok(Arc::clone(artifact))
    }

    async fn build_uncached(
        &self,
        interpreter: &InterpreterSpec,
        mitigation: Option<&MitigationSpec>,
        ops: Vec<PatchOperation>,
        variant: VariantKey,
        key: Digest,
    ) -> BuildArtifact {
        let start = Instant::now();
        let tree = self
            .variants_dir
            .join(format!("{}-{}", variant.label(), key.short()));
        let guard = match mitigation.map(|m| &m.launch) {
            Some(LaunchMode::Guarded { runner }) => Some(tree.join(runner)),
            _ => None,
        };
        emit_build_started(&variant, &key.short());

        if self.reuse_builds {
            if let Some(executable) = reuse_manifest(&tree, key) {
                emit_build_finished(&variant, true, 0, true);
                return BuildArtifact {
                    variant,
                    cache_key: key,
                    tree,
                    status: BuildStatus::Succeeded { executable },
                    log: format!("reused build from {}", MANIFEST_FILE),
                    guard,
                    duration_ms: 0,
                };
            }
        }

        let result = self
            .build_in_tree(interpreter, mitigation, ops, &variant, &tree)
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;
        emit_build_finished(&variant, result.is_ok(), duration_ms, false);

        match result {
            Ok((executable, log)) => {
                if self.reuse_builds {
                    write_manifest(&tree, key, &variant, &executable);
                }
                BuildArtifact {
                    variant,
                    cache_key: key,
                    tree,
                    status: BuildStatus::Succeeded { executable },
                    log,
                    guard,
                    duration_ms,
                }
            }
            Err(log) => {
                warn!(variant = %variant, "build failed: {}", last_line(&log));
                BuildArtifact {
                    variant,
                    cache_key: key,
                    tree,
                    status: BuildStatus::Failed,
                    log,
                    guard: None,
                    duration_ms,
                }
            }
        }
    }

    /// Materialize, patch and compile. `Err` carries the failure log.
    async fn build_in_tree(
        &self,
        interpreter: &InterpreterSpec,
        mitigation: Option<&MitigationSpec>,
        ops: Vec<PatchOperation>,
        variant: &VariantKey,
        tree: &Path,
    ) -> Result<(PathBuf, String), String> {
        if let Some(m) = mitigation {
            if !m.applies_to(interpreter) {
                return Err(format!(
                    "mitigation {} does not apply to {} ({})",
                    m.id, interpreter.id, interpreter.family
                ));
            }
        }

        let source = self.interpreters_dir.join(&interpreter.source_dir);
        if !source.is_dir() {
            return Err(format!("source tree not found: {}", source.display()));
        }
        if interpreter.recipe.flags_var.is_none() && ops.iter().any(|op| op.contributes_flags()) {
            return Err(format!(
                "recipe for {} has no flags variable; build flags cannot be applied",
                interpreter.id
            ));
        }

        let flags = {
            let variant = variant.clone();
            let tree = tree.to_path_buf();
            tokio::task::spawn_blocking(move || -> Result<BuildFlags, String> {
                let _span = VariantSpan::enter(&variant);
                patcher::validate(&source, &ops).map_err(|e| format!("patch rejected: {e}"))?;
                let files = tree::materialize(&source, &tree)
                    .map_err(|e| format!("failed to materialize {}: {e}", tree.display()))?;
                debug!(files = files, tree = %tree.display(), "materialized variant tree");
                patcher::apply(&tree, &ops).map_err(|e| format!("patch failed: {e}"))
            })
            .await
            .map_err(|e| format!("tree preparation aborted: {e}"))??
        };

        let argv = interpreter.recipe.render(tree, &flags);
        let mut log = format!("$ {}\n", argv.join(" "));

        self.native_builds.fetch_add(1, Ordering::SeqCst);
        let output = match self.toolchain.build(tree, &argv, self.build_timeout).await {
            Ok(output) => output,
            Err(e) => {
                log.push_str(&format!("build error: {e}\n"));
                return Err(log);
            }
        };
        log.push_str(&output.log);

        if !output.success() {
            let status = output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            log.push_str(&format!("\nbuild exited with status {status}\n"));
            return Err(log);
        }

        let executable = tree.join(&interpreter.recipe.executable);
        if !is_executable(&executable) {
            log.push_str(&format!(
                "\nexpected executable not produced: {}\n",
                executable.display()
            ));
            return Err(log);
        }
        Ok((executable, log))
    }
}

fn reuse_manifest(tree: &Path, key: Digest) -> Option<PathBuf> {
    let raw = std::fs::read_to_string(tree.join(MANIFEST_FILE)).ok()?;
    let manifest: BuildManifest = serde_json::from_str(&raw).ok()?;
    if manifest.cache_key != key || !is_executable(&manifest.executable) {
        debug!(tree = %tree.display(), "ignoring stale build manifest");
        return None;
    }
    Some(manifest.executable)
}

fn write_manifest(tree: &Path, key: Digest, variant: &VariantKey, executable: &Path) {
    let manifest = BuildManifest {
        cache_key: key,
        variant: variant.clone(),
        executable: executable.to_path_buf(),
        built_at: Utc::now(),
    };
    let result = serde_json::to_string_pretty(&manifest)
        .map_err(std::io::Error::other)
        .and_then(|json| std::fs::write(tree.join(MANIFEST_FILE), json));
    if let Err(e) = result {
        warn!(tree = %tree.display(), error = %e, "failed to write build manifest");
    }
}

/// Last non-empty line of a build log.
pub fn last_line(log: &str) -> &str {
    log.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
}
