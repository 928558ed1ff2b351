//! Structured lifecycle events for builds, runs and whole matrices.
//!
//! Events are emitted at `info!` level with an `event` field so they can be
//! filtered out of a JSON log stream.

use tracing::info;

use crate::domain::{Outcome, Triple, VariantKey};

/// RAII guard that enters a variant-scoped span; everything logged while
/// building and running that variant carries its label.
pub struct VariantSpan {
    _span: tracing::span::EnteredSpan,
}

impl VariantSpan {
    pub fn enter(variant: &VariantKey) -> Self {
        let span = tracing::info_span!("luabench.variant", variant = %variant.label());
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_matrix_started(run_id: &str, entries: usize, variants: usize) {
    info!(
        event = "matrix.started",
        run_id = %run_id,
        entries = entries,
        variants = variants,
    );
}

pub fn emit_build_started(variant: &VariantKey, cache_key: &str) {
    info!(event = "build.started", variant = %variant, cache_key = %cache_key);
}

pub fn emit_build_finished(variant: &VariantKey, success: bool, duration_ms: u64, cached: bool) {
    info!(
        event = "build.finished",
        variant = %variant,
        success = success,
        duration_ms = duration_ms,
        cached = cached,
    );
}

pub fn emit_entry_recorded(triple: &Triple, outcome: Outcome) {
    info!(event = "entry.recorded", entry = %triple, outcome = %outcome);
}

pub fn emit_matrix_finished(run_id: &str, entries: usize, exploited: usize, duration_ms: u64) {
    info!(
        event = "matrix.finished",
        run_id = %run_id,
        entries = entries,
        exploited = exploited,
        duration_ms = duration_ms,
    );
}

/// Cleanup of a side-effect or payload file failed (warning level).
pub fn emit_cleanup_error(path: &std::path::Path, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "cleanup.error", path = %path.display(), error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_span_enter() {
        let _span = VariantSpan::enter(&VariantKey::new("lua-5.4.6", None));
    }
}
