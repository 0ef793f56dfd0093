//! Transformation engine.
//!
//! Each layer's rewrite is a pure function from input text to output text,
//! available in up to two interchangeable implementations: a structural
//! (parse-based) transform and a textual substitution. Layers below
//! [`crate::layers::STRUCTURAL_THRESHOLD`] run the textual strategy only;
//! higher layers try the structural strategy first and fall back to the
//! textual one when it fails.

mod structural;
mod textual;

pub use structural::{ExportComponents, MergeImports, StripDebugStatements, VarToLetConst};
pub use textual::{
    DecodeEntities, DedupeImportLines, ExportComponentsTextual, StripDebugTextual,
    UpgradeConfigTargets, VarToLetTextual,
};

use tracing::{debug, warn};

use crate::error::{EngineError, ErrorCategory};
use crate::layers::STRUCTURAL_THRESHOLD;

/// Output of one rewrite strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub code: String,
    pub change_count: usize,
    pub improvements: Vec<String>,
}

impl Transformed {
    /// The input text, untouched.
    pub fn unchanged(code: &str) -> Self {
        Self {
            code: code.to_string(),
            change_count: 0,
            improvements: Vec::new(),
        }
    }
}

/// A single rewrite strategy. Implementations must be pure: no observable
/// side effects beyond the return value and diagnostic logging.
pub trait Rewrite: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, code: &str) -> Result<Transformed, EngineError>;
}

/// The strategies registered for one layer.
struct LayerStrategies {
    structural: Option<&'static dyn Rewrite>,
    textual: &'static dyn Rewrite,
}

fn strategies(layer_id: u32) -> Option<LayerStrategies> {
    let pair = match layer_id {
        1 => LayerStrategies {
            structural: None,
            textual: &UpgradeConfigTargets,
        },
        2 => LayerStrategies {
            structural: None,
            textual: &DecodeEntities,
        },
        3 => LayerStrategies {
            structural: Some(&MergeImports),
            textual: &DedupeImportLines,
        },
        4 => LayerStrategies {
            structural: Some(&ExportComponents),
            textual: &ExportComponentsTextual,
        },
        5 => LayerStrategies {
            structural: Some(&VarToLetConst),
            textual: &VarToLetTextual,
        },
        6 => LayerStrategies {
            structural: Some(&StripDebugStatements),
            textual: &StripDebugTextual,
        },
        _ => return None,
    };
    debug_assert!(
        (layer_id < STRUCTURAL_THRESHOLD) == pair.structural.is_none(),
        "threshold and strategy table disagree for layer {layer_id}"
    );
    Some(pair)
}

/// Result of executing one layer against one input.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub layer_id: u32,
    pub success: bool,
    pub code: String,
    pub change_count: usize,
    pub improvements: Vec<String>,
    pub used_fallback: bool,
    pub error: Option<EngineError>,
}

/// Executes layer rewrites with the structural-first, textual-fallback
/// strategy.
#[derive(Debug, Default, Clone, Copy)]
pub struct Engine;

impl Engine {
    pub fn new() -> Self {
        Self
    }

    /// Run one layer against `code`. Never panics; failures of both
    /// strategies surface as `success: false` with the triggering error.
    pub fn execute(&self, code: &str, layer_id: u32) -> ExecutionOutcome {
        let Some(pair) = strategies(layer_id) else {
            return ExecutionOutcome {
                layer_id,
                success: false,
                code: code.to_string(),
                change_count: 0,
                improvements: Vec::new(),
                used_fallback: false,
                error: Some(EngineError::new(
                    ErrorCategory::Dependency,
                    format!("no transform registered for layer {layer_id}"),
                )),
            };
        };

        if let Some(structural) = pair.structural {
            match structural.apply(code) {
                Ok(t) => {
                    debug!(layer_id, strategy = structural.name(), changes = t.change_count);
                    return outcome_ok(layer_id, t, false, None);
                }
                Err(e) => {
                    warn!(
                        layer_id,
                        strategy = structural.name(),
                        error = %e,
                        "structural transform failed, falling back to textual"
                    );
                    return match pair.textual.apply(code) {
                        Ok(t) => outcome_ok(layer_id, t, true, Some(e)),
                        Err(fallback_err) => ExecutionOutcome {
                            layer_id,
                            success: false,
                            code: code.to_string(),
                            change_count: 0,
                            improvements: Vec::new(),
                            used_fallback: true,
                            error: Some(fallback_err),
                        },
                    };
                }
            }
        }

        match pair.textual.apply(code) {
            Ok(t) => outcome_ok(layer_id, t, false, None),
            Err(e) => ExecutionOutcome {
                layer_id,
                success: false,
                code: code.to_string(),
                change_count: 0,
                improvements: Vec::new(),
                used_fallback: false,
                error: Some(e),
            },
        }
    }

    /// The textual strategy alone, exposed for recovery re-execution.
    pub fn execute_textual(&self, code: &str, layer_id: u32) -> Result<Transformed, EngineError> {
        let pair = strategies(layer_id).ok_or_else(|| {
            EngineError::new(
                ErrorCategory::Dependency,
                format!("no transform registered for layer {layer_id}"),
            )
        })?;
        pair.textual.apply(code)
    }
}

fn outcome_ok(
    layer_id: u32,
    t: Transformed,
    used_fallback: bool,
    error: Option<EngineError>,
) -> ExecutionOutcome {
    ExecutionOutcome {
        layer_id,
        success: true,
        code: t.code,
        change_count: t.change_count,
        improvements: t.improvements,
        used_fallback,
        error,
    }
}
