//! Recovery strategies: ordered remediation attempts after a layer failure.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::Engine;
use crate::error::{EngineError, ErrorCategory};

use super::categorize::layer_hints;

/// Strategy priority. Higher sorts first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// The remediation families the recovery system knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Re-execute the layer with its textual strategy only.
    TextualFallback,
    /// Apply the textual strategy line by line, keeping what succeeds.
    PartialTransform,
    /// Balance brackets first, then retry the full layer.
    SyntaxRepair,
    /// Keep the pre-layer code untouched and move on.
    SkipLayer,
}

impl StrategyKind {
    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::TextualFallback => "textual-fallback",
            StrategyKind::PartialTransform => "partial-transform",
            StrategyKind::SyntaxRepair => "syntax-repair",
            StrategyKind::SkipLayer => "skip-layer",
        }
    }

    fn base_priority(self, category: ErrorCategory) -> Priority {
        match (self, category) {
            (StrategyKind::TextualFallback, ErrorCategory::Parsing) => Priority::Critical,
            (StrategyKind::TextualFallback, _) => Priority::High,
            (StrategyKind::SyntaxRepair, ErrorCategory::Parsing | ErrorCategory::Syntax) => {
                Priority::High
            }
            (StrategyKind::SyntaxRepair, _) => Priority::Medium,
            (StrategyKind::PartialTransform, ErrorCategory::Transformation) => Priority::High,
            (StrategyKind::PartialTransform, _) => Priority::Medium,
            (StrategyKind::SkipLayer, ErrorCategory::Dependency) => Priority::Medium,
            (StrategyKind::SkipLayer, _) => Priority::Low,
        }
    }
}

/// One selected strategy, ready to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub kind: StrategyKind,
    pub priority: Priority,
}

/// Build the ordered strategy list for a failure. Fatal categories get no
/// strategies. Layer hints contribute candidates; the generic set fills in
/// behind them.
pub fn select_strategies(category: ErrorCategory, layer_id: u32) -> Vec<Strategy> {
    if !category.is_recoverable() {
        return Vec::new();
    }

    let mut kinds: Vec<StrategyKind> = Vec::new();
    if let Some(hints) = layer_hints(layer_id) {
        kinds.extend_from_slice(hints.candidates);
    }
    // SkipLayer is never a generic candidate: a layer only gets skipped when
    // its hint table opts in, otherwise "all strategies failed" could not
    // happen for recoverable categories.
    for generic in [
        StrategyKind::TextualFallback,
        StrategyKind::PartialTransform,
        StrategyKind::SyntaxRepair,
    ] {
        if !kinds.contains(&generic) {
            kinds.push(generic);
        }
    }

    let mut strategies: Vec<Strategy> = kinds
        .into_iter()
        .map(|kind| Strategy {
            kind,
            priority: kind.base_priority(category),
        })
        .collect();
    // Stable sort keeps hint order within equal priorities.
    strategies.sort_by(|a, b| b.priority.cmp(&a.priority));
    debug!(layer_id, ?category, count = strategies.len(), "selected strategies");
    strategies
}

/// Execute one strategy against the failing input, producing a candidate.
pub fn run_strategy(
    strategy: Strategy,
    engine: &Engine,
    layer_id: u32,
    code: &str,
) -> Result<(String, usize), EngineError> {
    match strategy.kind {
        StrategyKind::TextualFallback => {
            let t = engine.execute_textual(code, layer_id)?;
            Ok((t.code, t.change_count))
        }
        StrategyKind::PartialTransform => {
            let mut out_lines: Vec<String> = Vec::new();
            let mut changes = 0;
            for line in code.lines() {
                match engine.execute_textual(line, layer_id) {
                    Ok(t) if t.change_count > 0 => {
                        changes += t.change_count;
                        out_lines.push(t.code);
                    }
                    _ => out_lines.push(line.to_string()),
                }
            }
            if changes == 0 {
                return Err(EngineError::transformation(
                    "partial transformation made no progress",
                ));
            }
            let mut out = out_lines.join("\n");
            if code.ends_with('\n') && !out.ends_with('\n') {
                out.push('\n');
            }
            Ok((out, changes))
        }
        StrategyKind::SyntaxRepair => {
            let repaired = repair_brackets(code);
            let outcome = engine.execute(&repaired, layer_id);
            if outcome.success {
                Ok((outcome.code, outcome.change_count))
            } else {
                Err(outcome.error.unwrap_or_else(|| {
                    EngineError::transformation("retry after bracket repair failed")
                }))
            }
        }
        StrategyKind::SkipLayer => Ok((code.to_string(), 0)),
    }
}

/// Append closers for brackets left open and drop stray closers. A blunt
/// instrument: it restores balance, not intent.
pub fn repair_brackets(code: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut out = String::with_capacity(code.len() + 4);
    for ch in code.chars() {
        match ch {
            '(' | '[' | '{' => {
                stack.push(ch);
                out.push(ch);
            }
            ')' | ']' | '}' => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.last() == Some(&expected) {
                    stack.pop();
                    out.push(ch);
                }
                // Stray closer: dropped.
            }
            _ => out.push(ch),
        }
    }
    while let Some(open) = stack.pop() {
        out.push(match open {
            '(' => ')',
            '[' => ']',
            _ => '}',
        });
    }
    out
}
