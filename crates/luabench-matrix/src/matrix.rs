//! Matrix aggregator: resolves a selection, groups it by variant, and drives
//! builder and runner for every triple.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use luabench_core::obs::{
    emit_cleanup_error, emit_entry_recorded, emit_matrix_finished, emit_matrix_started,
};
use luabench_core::{
    BenchConfig, Catalog, ExploitSpec, InterpreterSpec, MatrixReport, MitigationSpec, Outcome,
    RunResult, Triple, VariantKey, NO_MITIGATION,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::builder::{last_line, VariantBuilder};
use crate::effect::EffectLocks;
use crate::error::{MatrixError, MatrixResult};
use crate::runner::SandboxedRunner;
use crate::toolchain::{MakeToolchain, Toolchain};

/// Identifiers requested on each axis. `none` is allowed on the mitigation
/// axis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub interpreters: Vec<String>,
    pub exploits: Vec<String>,
    pub mitigations: Vec<String>,
}

impl Selection {
    pub fn new<I, E, M, S>(interpreters: I, exploits: E, mitigations: M) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = S>,
        M: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            interpreters: interpreters.into_iter().map(Into::into).collect(),
            exploits: exploits.into_iter().map(Into::into).collect(),
            mitigations: mitigations.into_iter().map(Into::into).collect(),
        }
    }

    /// One (interpreter, exploit, mitigation) triple.
    pub fn single(interpreter: &str, exploit: &str, mitigation: Option<&str>) -> Self {
        Self::new(
            [interpreter],
            [exploit],
            [mitigation.unwrap_or(NO_MITIGATION)],
        )
    }

    /// The full catalog, unpatched baseline included.
    pub fn everything(catalog: &Catalog) -> Self {
        let mut mitigations = vec![NO_MITIGATION.to_string()];
        mitigations.extend(catalog.mitigations.ids());
        Self {
            interpreters: catalog.interpreter_ids(),
            exploits: catalog.exploits.ids(),
            mitigations,
        }
    }

    /// Number of triples, before de-duplication.
    pub fn triple_count(&self) -> usize {
        self.interpreters.len() * self.exploits.len() * self.mitigations.len()
    }
}

/// All triples sharing one variant.
struct VariantPlan<'a> {
    interpreter: &'a InterpreterSpec,
    mitigation: Option<&'a MitigationSpec>,
    exploits: Vec<&'a ExploitSpec>,
}

impl VariantPlan<'_> {
    fn key(&self) -> VariantKey {
        VariantKey::new(
            self.interpreter.id.clone(),
            self.mitigation.map(|m| m.id.clone()),
        )
    }

    fn triple(&self, exploit: &ExploitSpec) -> Triple {
        Triple::new(
            self.interpreter.id.clone(),
            exploit.id.clone(),
            self.mitigation.map(|m| m.id.clone()),
        )
    }
}

fn record(results: &mut Vec<RunResult>, result: RunResult) {
    emit_entry_recorded(&result.triple, result.outcome);
    results.push(result);
}

fn dedup(ids: &[String]) -> Vec<&str> {
    let mut seen = std::collections::HashSet::new();
    ids.iter()
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Drives a whole benchmark run. One instance corresponds to one run id.
pub struct Matrix {
    catalog: Catalog,
    config: BenchConfig,
    run_id: Uuid,
    builder: VariantBuilder,
    runner: SandboxedRunner,
}

impl Matrix {
    /// Engine using the real native toolchain.
    pub fn new(catalog: Catalog, config: BenchConfig) -> MatrixResult<Self> {
        Self::with_toolchain(catalog, config, Arc::new(MakeToolchain))
    }

    pub fn with_toolchain(
        catalog: Catalog,
        config: BenchConfig,
        toolchain: Arc<dyn Toolchain>,
    ) -> MatrixResult<Self> {
        config.validate().map_err(MatrixError::Config)?;
        let cwd = std::env::current_dir()
            .map_err(|e| MatrixError::Config(format!("cannot resolve working directory: {e}")))?;
        let config = config.anchored_at(&cwd);
        let run_id = Uuid::new_v4();
        let builder = VariantBuilder::new(&config, run_id, catalog.mitigations.clone(), toolchain);
        let runner = SandboxedRunner::new(&config, run_id, Arc::new(EffectLocks::new()));
        Ok(Self {
            catalog,
            config,
            run_id,
            builder,
            runner,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn builder(&self) -> &VariantBuilder {
        &self.builder
    }

    /// Resolve every identifier up front. Nothing runs if one is unknown.
    fn plan(&self, selection: &Selection) -> MatrixResult<Vec<VariantPlan<'_>>> {
        if selection.interpreters.is_empty() {
            return Err(MatrixError::EmptySelection("no interpreters selected"));
        }
        if selection.exploits.is_empty() {
            return Err(MatrixError::EmptySelection("no exploits selected"));
        }
        if selection.mitigations.is_empty() {
            return Err(MatrixError::EmptySelection("no mitigations selected"));
        }

        let interpreters = dedup(&selection.interpreters)
            .into_iter()
            .map(|id| self.catalog.interpreter(id))
            .collect::<Result<Vec<_>, _>>()?;
        let exploits = dedup(&selection.exploits)
            .into_iter()
            .map(|id| self.catalog.exploit(id))
            .collect::<Result<Vec<_>, _>>()?;
        let mitigations = dedup(&selection.mitigations)
            .into_iter()
            .map(|id| self.catalog.mitigation(id))
            .collect::<Result<Vec<_>, _>>()?;

        let mut plans = Vec::with_capacity(interpreters.len() * mitigations.len());
        for interpreter in interpreters.iter().copied() {
            for mitigation in mitigations.iter().copied() {
                plans.push(VariantPlan {
                    interpreter,
                    mitigation,
                    exploits: exploits.clone(),
                });
            }
        }
        Ok(plans)
    }

    /// Run every triple of `selection` and collect the report.
    ///
    /// Only an invalid selection is an error. Build failures, launch
    /// failures and harness faults are recorded per entry.
    pub async fn run(&self, selection: &Selection) -> MatrixResult<MatrixReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let plans = self.plan(selection)?;

        let entries: usize = plans.iter().map(|p| p.exploits.len()).sum();
        let run_id = self.run_id.to_string();
        emit_matrix_started(&run_id, entries, plans.len());

        let jobs = self.config.jobs.max(1);
        let groups: Vec<Vec<RunResult>> = stream::iter(plans)
            .map(|plan| self.run_variant(plan))
            .buffer_unordered(jobs)
            .collect()
            .await;
        let results: Vec<RunResult> = groups.into_iter().flatten().collect();

        self.remove_run_dirs().await;

        let report = MatrixReport::new(self.run_id, started_at, Utc::now(), results);
        emit_matrix_finished(
            &run_id,
            report.results.len(),
            report.exploited_count(),
            start.elapsed().as_millis() as u64,
        );
        Ok(report)
    }

    /// Drop the run's scratch space. Only persistent variant trees under
    /// `temp/variants` outlive a run.
    async fn remove_run_dirs(&self) {
        let run = self.run_id.to_string();
        if !self.config.reuse_builds {
            self.builder.forget_builds().await;
        }
        let mut dirs = vec![self.config.temp_dir.join(&run)];
        if self.config.isolate_targets {
            dirs.push(self.config.exploited_dir.join(&run));
        }
        for dir in dirs {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => debug!(dir = %dir.display(), "removed run directory"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => emit_cleanup_error(&dir, &e),
            }
        }
    }

    fn effect_dir(&self, variant: &VariantKey, exploit: &ExploitSpec) -> PathBuf {
        if self.config.isolate_targets {
            self.config
                .exploited_dir
                .join(self.run_id.to_string())
                .join(variant.label())
                .join(&exploit.id)
        } else {
            self.config.exploited_dir.clone()
        }
    }

    async fn run_variant(&self, plan: VariantPlan<'_>) -> Vec<RunResult> {
        let variant = plan.key();
        let mut results = Vec::with_capacity(plan.exploits.len());

        let mut runnable = Vec::new();
        for exploit in &plan.exploits {
            let triple = plan.triple(exploit);
            if let Some(m) = plan.mitigation {
                if !self.catalog.mitigations.applicable(m, plan.interpreter) {
                    let detail = format!(
                        "mitigation {} does not apply to {} ({})",
                        m.id, plan.interpreter.id, plan.interpreter.family
                    );
                    record(
                        &mut results,
                        RunResult::new(triple, Outcome::Inapplicable).with_detail(detail),
                    );
                    continue;
                }
            }
            if !self
                .catalog
                .exploits
                .applicable(exploit, plan.interpreter.family)
            {
                let detail = format!(
                    "exploit {} does not target {}",
                    exploit.id, plan.interpreter.family
                );
                record(
                    &mut results,
                    RunResult::new(triple, Outcome::Inapplicable).with_detail(detail),
                );
                continue;
            }
            runnable.push(*exploit);
        }

        if runnable.is_empty() {
            return results;
        }

        info!(variant = %variant, exploits = runnable.len(), "running variant");
        let mitigation_id = plan.mitigation.map(|m| m.id.as_str());
        let artifact = match self.builder.build(plan.interpreter, mitigation_id).await {
            Ok(artifact) => artifact,
            Err(e) => {
                for exploit in runnable {
                    record(
                        &mut results,
                        RunResult::new(plan.triple(exploit), Outcome::HarnessFault)
                            .with_detail(e.to_string()),
                    );
                }
                return results;
            }
        };

        if !artifact.succeeded() {
            let detail = format!("build failed: {}", last_line(&artifact.log));
            for exploit in runnable {
                record(
                    &mut results,
                    RunResult::new(plan.triple(exploit), Outcome::BuildFailed)
                        .with_detail(detail.clone()),
                );
            }
            return results;
        }

        for exploit in runnable {
            let triple = plan.triple(exploit);
            let effect_dir = self.effect_dir(&variant, exploit);
            let mitigated = plan.mitigation.is_some();
            let result = match self
                .runner
                .run(&artifact, exploit, mitigated, &effect_dir)
                .await
            {
                Ok(report) => {
                    let mut result = RunResult::new(triple, report.outcome);
                    if let Some(evidence) = report.evidence {
                        result = result.with_evidence(evidence);
                    }
                    if let Some(detail) = report.detail {
                        result = result.with_detail(detail);
                    }
                    result
                }
                Err(e) => RunResult::new(triple, Outcome::HarnessFault).with_detail(e.to_string()),
            };
            record(&mut results, result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptToolchain;
    use luabench_core::CatalogError;

    fn matrix(workdir: &std::path::Path) -> Matrix {
        Matrix::with_toolchain(
            Catalog::builtin(),
            BenchConfig::from_workdir(workdir),
            Arc::new(ScriptToolchain::new("#!/bin/sh\n")),
        )
        .unwrap()
    }

    #[test]
    fn test_selection_everything_includes_baseline() {
        let catalog = Catalog::builtin();
        let selection = Selection::everything(&catalog);
        assert_eq!(selection.mitigations[0], NO_MITIGATION);
        assert_eq!(selection.mitigations.len(), 5);
        assert_eq!(selection.triple_count(), 8 * 4 * 5);
    }

    #[test]
    fn test_plan_groups_by_variant_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let m = matrix(dir.path());
        let selection = Selection::new(
            ["lua-5.4.6", "luau", "lua-5.4.6"],
            ["std_os_execute", "ffi_load"],
            ["none", "disable_ffi"],
        );
        let plans = m.plan(&selection).unwrap();
        assert_eq!(plans.len(), 4);
        assert!(plans.iter().all(|p| p.exploits.len() == 2));
        assert_eq!(plans[1].key().label(), "lua-5.4.6_disable_ffi");
    }

    #[tokio::test]
    async fn test_unknown_identifier_fails_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let m = matrix(dir.path());
        let selection = Selection::single("lua-5.4.6", "heap_spray", None);
        let err = m.run(&selection).await.expect_err("unknown exploit");
        assert!(matches!(
            err,
            MatrixError::Catalog(CatalogError::UnknownExploit(ref id)) if id == "heap_spray"
        ));
        assert_eq!(m.builder().native_builds(), 0);
    }

    #[tokio::test]
    async fn test_empty_axis_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let m = matrix(dir.path());
        let selection = Selection::new(["lua-5.4.6"], Vec::<&str>::new(), ["none"]);
        assert!(matches!(
            m.run(&selection).await,
            Err(MatrixError::EmptySelection(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BenchConfig::from_workdir(dir.path());
        config.jobs = 0;
        let result = Matrix::with_toolchain(
            Catalog::builtin(),
            config,
            Arc::new(ScriptToolchain::new("")),
        );
        assert!(matches!(result, Err(MatrixError::Config(_))));
    }
}
