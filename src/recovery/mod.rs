//! Error recovery for failed layer executions.
//!
//! Per layer the flow is: categorize the failure, select an ordered list of
//! strategies, execute candidates until the validator accepts one. Every
//! attempt is recorded whether or not it succeeded; an unrecovered failure
//! keeps the pre-layer code and yields a diagnostic bundle.

mod categorize;
mod diagnostics;
mod strategies;

pub use categorize::{categorize, categorize_foreign, layer_hints, LayerHints};
pub use diagnostics::{
    aggregate_suggestions, build_diagnostic, suggestions_for, DiagnosticBundle, SourceLocation,
};
pub use strategies::{repair_brackets, select_strategies, Priority, Strategy, StrategyKind};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::Engine;
use crate::error::{EngineError, ErrorCategory, Severity};
use crate::validator;

/// One recovery attempt, recorded regardless of outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub strategy: String,
    pub succeeded: bool,
    pub detail: Option<String>,
}

/// The result of running the recovery state machine for one failed layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub recovered: bool,
    /// The accepted candidate, when recovery succeeded.
    pub code: Option<String>,
    pub change_count: usize,
    /// Name of the winning strategy.
    pub strategy: Option<String>,
    pub attempts: Vec<RecoveryAttempt>,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub suggestions: Vec<String>,
}

/// Try to recover a failed layer execution against its pre-layer input.
///
/// Candidates are validated against the pre-layer code; the first one the
/// validator accepts wins. Fatal categories produce no attempts, and at most
/// `max_attempts` strategies are tried (zero disables recovery entirely).
pub fn attempt_recovery(
    engine: &Engine,
    layer_id: u32,
    pre_layer_code: &str,
    error: &EngineError,
    max_attempts: usize,
) -> RecoveryReport {
    let category = categorize(error);
    let severity = category.default_severity();
    let mut selected = select_strategies(category, layer_id);
    selected.truncate(max_attempts);
    let mut attempts: Vec<RecoveryAttempt> = Vec::new();

    for strategy in selected {
        let name = strategy.kind.name().to_string();
        match strategies::run_strategy(strategy, engine, layer_id, pre_layer_code) {
            Ok((candidate, change_count)) => {
                let verdict = validator::validate(pre_layer_code, &candidate);
                if verdict.should_revert {
                    debug!(layer_id, strategy = %name, "candidate rejected by validator");
                    attempts.push(RecoveryAttempt {
                        strategy: name,
                        succeeded: false,
                        detail: verdict.reason,
                    });
                } else {
                    info!(layer_id, strategy = %name, "recovery succeeded");
                    attempts.push(RecoveryAttempt {
                        strategy: name.clone(),
                        succeeded: true,
                        detail: None,
                    });
                    return RecoveryReport {
                        recovered: true,
                        code: Some(candidate),
                        change_count,
                        strategy: Some(name),
                        attempts,
                        category,
                        severity,
                        suggestions: Vec::new(),
                    };
                }
            }
            Err(e) => {
                debug!(layer_id, strategy = %name, error = %e, "strategy failed");
                attempts.push(RecoveryAttempt {
                    strategy: name,
                    succeeded: false,
                    detail: Some(e.to_string()),
                });
            }
        }
    }

    RecoveryReport {
        recovered: false,
        code: None,
        change_count: 0,
        strategy: None,
        attempts,
        category,
        severity,
        suggestions: suggestions_for(category, layer_id),
    }
}
