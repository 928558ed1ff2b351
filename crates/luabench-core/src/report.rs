use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Outcome, RunResult};

pub const REPORT_SCHEMA_VERSION: &str = "1.0";

/// Result of a whole matrix run. Every requested triple appears exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatrixReport {
    pub schema_version: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Number of results per outcome name (outcomes with no result omitted).
    pub counts: BTreeMap<String, usize>,
    /// Nested view `variant label -> exploit -> outcome`.
    pub by_variant: BTreeMap<String, BTreeMap<String, Outcome>>,
    /// Sorted by (interpreter, mitigation, exploit).
    pub results: Vec<RunResult>,
}

impl MatrixReport {
    pub fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        mut results: Vec<RunResult>,
    ) -> Self {
        results.sort_by(|a, b| a.triple.cmp(&b.triple));

        let mut counts = BTreeMap::new();
        let mut by_variant: BTreeMap<String, BTreeMap<String, Outcome>> = BTreeMap::new();
        for r in &results {
            *counts.entry(r.outcome.name().to_string()).or_insert(0) += 1;
            by_variant
                .entry(r.triple.variant().label())
                .or_default()
                .insert(r.triple.exploit.clone(), r.outcome);
        }

        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            run_id,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            counts,
            by_variant,
            results,
        }
    }

    pub fn exploited_count(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.exploited()).count()
    }
}

/// Render the report as a markdown table.
pub fn render_table_md(report: &MatrixReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Matrix {}\n\n", report.run_id));
    out.push_str("| interpreter | mitigation | exploit | outcome | detail |\n");
    out.push_str("|---|---|---|---|---|\n");
    for r in &report.results {
        let detail = r
            .detail
            .as_deref()
            .map(|d| d.lines().next().unwrap_or("").replace('|', "\\|"))
            .unwrap_or_default();
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            r.triple.interpreter,
            r.triple.mitigation.as_deref().unwrap_or("none"),
            r.triple.exploit,
            r.outcome,
            detail
        ));
    }

    out.push_str("\n## By variant\n");
    for (variant, exploits) in &report.by_variant {
        let row: Vec<String> = exploits
            .iter()
            .map(|(exploit, outcome)| format!("{exploit}={outcome}"))
            .collect();
        out.push_str(&format!("- {}: {}\n", variant, row.join(", ")));
    }

    out.push_str("\n## Summary\n");
    for (outcome, count) in &report.counts {
        out.push_str(&format!("- {}: {}\n", outcome, count));
    }
    out.push_str(&format!("- duration: {}ms\n", report.duration_ms));
    out
}

/// Write the report as pretty JSON.
pub fn write_report_json(path: &Path, report: &MatrixReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize matrix report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}
