//! Pipeline execution engine.

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::{EngineError, ErrorCategory};
use crate::layers;
use crate::recovery::{self, DiagnosticBundle};
use crate::state::StateTracker;
use crate::timing;
use crate::validator;

use super::types::{
    file_kind, Disposition, FileKind, PipelineOptions, PipelineReport, PipelineStats,
    PostRunCheck, TransformationResult,
};

/// Sequential modernization pipeline for a single input.
///
/// Layer N+1 never begins before layer N's result is finalized and
/// recorded. Independent inputs run through separate pipeline instances,
/// one per worker.
#[derive(Default)]
pub struct TransformationPipeline {
    engine: Engine,
    post_run: Option<Box<dyn PostRunCheck>>,
}

impl TransformationPipeline {
    pub fn new() -> Self {
        Self {
            engine: Engine::new(),
            post_run: None,
        }
    }

    /// Install a post-run validation hook, invoked once after all layers.
    pub fn with_post_run_check(mut self, check: Box<dyn PostRunCheck>) -> Self {
        self.post_run = Some(check);
        self
    }

    /// Run the full layer sequence against `code`.
    ///
    /// Failing layers never abort the run unless `fail_fast` is set; their
    /// failures become structured results instead.
    pub fn run(&self, code: &str, options: &PipelineOptions) -> PipelineReport {
        let run_timer = timing::start_timer();
        let resolution = layers::resolve(&options.layers);
        let kind = file_kind(options.path_hint.as_deref());
        if options.verbose {
            info!(
                layers = ?resolution.corrected,
                warnings = resolution.warnings.len(),
                "starting pipeline"
            );
        }

        let mut tracker = StateTracker::new(code);
        let mut current = code.to_string();
        let mut results: Vec<TransformationResult> = Vec::new();
        let mut bundles: Vec<DiagnosticBundle> = Vec::new();
        let mut prior_errors: Vec<(ErrorCategory, String)> = Vec::new();
        let mut aborted = false;

        for layer_id in resolution.corrected.clone() {
            if aborted {
                results.push(TransformationResult::skipped(
                    layer_id,
                    "skipped: fail-fast after an earlier failure",
                ));
                continue;
            }
            if layers::layer(layer_id).is_none() {
                results.push(TransformationResult::skipped(layer_id, "unknown layer"));
                continue;
            }
            if !layer_applies(kind, layer_id) {
                results.push(TransformationResult::skipped(
                    layer_id,
                    format!("not applicable to {kind:?} input"),
                ));
                continue;
            }

            let (result, next_code) = self.run_layer(
                layer_id,
                &current,
                &mut tracker,
                &mut bundles,
                &mut prior_errors,
                options,
            );
            if result.disposition == Disposition::Failed && options.fail_fast {
                aborted = true;
            }
            if let Some(next) = next_code {
                current = next;
            }
            results.push(result);
        }

        let failed_layers = results
            .iter()
            .filter(|r| r.disposition == Disposition::Failed)
            .count();
        let successful_layers = results
            .iter()
            .filter(|r| {
                matches!(r.disposition, Disposition::Applied | Disposition::Reverted)
            })
            .count();

        let reverted_layers = results
            .iter()
            .filter(|r| r.disposition == Disposition::Reverted)
            .count();

        let mut success =
            failed_layers == 0 && !(options.strict_validation && reverted_layers > 0);
        let mut diagnostics = None;
        if let Some(check) = &self.post_run {
            if let Err(message) = check.check(&current) {
                warn!(check = check.name(), %message, "post-run validation failed");
                success = false;
                diagnostics = Some(format!("{} check failed: {message}", check.name()));
            }
        }

        PipelineReport {
            success,
            code: current,
            stats: PipelineStats {
                total_layers: results.len(),
                successful_layers,
                failed_layers,
                total_execution_time_ms: timing::elapsed_ms(run_timer),
            },
            results,
            warnings: resolution.warnings,
            suggestions: recovery::aggregate_suggestions(&bundles),
            diagnostics,
            snapshots: tracker.snapshots().to_vec(),
            dry_run: options.dry_run,
        }
    }

    /// Execute one layer and fold validation plus recovery into a result.
    /// Returns the result and, when the layer was accepted, the new code.
    fn run_layer(
        &self,
        layer_id: u32,
        current: &str,
        tracker: &mut StateTracker,
        bundles: &mut Vec<DiagnosticBundle>,
        prior_errors: &mut Vec<(ErrorCategory, String)>,
        options: &PipelineOptions,
    ) -> (TransformationResult, Option<String>) {
        let layer_timer = timing::start_timer();
        let name = layers::layer_name(layer_id);
        if options.verbose {
            info!(layer_id, layer = %name, "running layer");
        } else {
            debug!(layer_id, layer = %name, "running layer");
        }

        let outcome = self.engine.execute(current, layer_id);
        let elapsed = timing::elapsed_ms(layer_timer);

        if outcome.success {
            let verdict = if options.revert_unsafe {
                validator::validate(current, &outcome.code)
            } else {
                validator::Verdict {
                    should_revert: false,
                    reason: None,
                }
            };
            if verdict.should_revert {
                info!(layer_id, reason = ?verdict.reason, "layer reverted");
                return (
                    TransformationResult {
                        layer_id,
                        layer_name: name,
                        disposition: Disposition::Reverted,
                        success: true,
                        change_count: 0,
                        improvements: Vec::new(),
                        used_fallback: outcome.used_fallback,
                        error: None,
                        error_category: None,
                        severity: None,
                        suggestion: None,
                        recovery_options: Vec::new(),
                        reverted: true,
                        revert_reason: verdict.reason,
                        recovered_by: None,
                        execution_time_ms: elapsed,
                    },
                    None,
                );
            }

            tracker.record(layer_id, &outcome.code, format!("{name} applied"));
            return (
                TransformationResult {
                    layer_id,
                    layer_name: name,
                    disposition: Disposition::Applied,
                    success: true,
                    change_count: outcome.change_count,
                    improvements: outcome.improvements,
                    used_fallback: outcome.used_fallback,
                    error: outcome.error.as_ref().map(|e| e.message.clone()),
                    error_category: outcome.error.as_ref().map(|e| e.category),
                    severity: None,
                    suggestion: None,
                    recovery_options: Vec::new(),
                    reverted: false,
                    revert_reason: None,
                    recovered_by: None,
                    execution_time_ms: elapsed,
                },
                Some(outcome.code),
            );
        }

        // Both strategies failed: run the recovery state machine.
        let error = outcome
            .error
            .unwrap_or_else(|| EngineError::new(ErrorCategory::Unknown, "unreported failure"));
        let max_attempts = if options.recovery {
            options.max_recovery_attempts
        } else {
            0
        };
        let report =
            recovery::attempt_recovery(&self.engine, layer_id, current, &error, max_attempts);
        let attempted: Vec<String> = report
            .attempts
            .iter()
            .map(|a| a.strategy.clone())
            .collect();
        prior_errors.push((report.category, error.message.clone()));

        if report.recovered {
            let recovered_code = report.code.unwrap_or_else(|| current.to_string());
            tracker.record(layer_id, &recovered_code, format!("{name} recovered"));
            return (
                TransformationResult {
                    layer_id,
                    layer_name: name,
                    disposition: Disposition::Applied,
                    success: true,
                    change_count: report.change_count,
                    improvements: Vec::new(),
                    used_fallback: true,
                    error: Some(error.message),
                    error_category: Some(report.category),
                    severity: Some(report.severity),
                    suggestion: None,
                    recovery_options: attempted,
                    reverted: false,
                    revert_reason: None,
                    recovered_by: report.strategy,
                    execution_time_ms: timing::elapsed_ms(layer_timer),
                },
                Some(recovered_code),
            );
        }

        let similar = prior_errors
            .iter()
            .filter(|(c, m)| *c == report.category && *m != error.message)
            .map(|(_, m)| m.clone())
            .collect();
        let bundle =
            recovery::build_diagnostic(layer_id, current, &error, elapsed, similar);
        let suggestion = bundle.suggestions.first().cloned();
        bundles.push(bundle);
        warn!(layer_id, error = %error, "layer failed, no recovery succeeded");

        (
            TransformationResult {
                layer_id,
                layer_name: name,
                disposition: Disposition::Failed,
                success: false,
                change_count: 0,
                improvements: Vec::new(),
                used_fallback: true,
                error: Some(error.message.clone()),
                error_category: Some(report.category),
                severity: Some(report.severity),
                suggestion,
                recovery_options: attempted,
                reverted: false,
                revert_reason: None,
                recovered_by: None,
                execution_time_ms: timing::elapsed_ms(layer_timer),
            },
            None,
        )
    }
}

fn layer_applies(kind: FileKind, layer_id: u32) -> bool {
    match kind {
        // Configuration documents only get the config and entity layers.
        FileKind::Config => layer_id <= 2,
        // Source files never get the config-document layer.
        FileKind::Source => layer_id != 1,
        FileKind::Unknown => true,
    }
}
