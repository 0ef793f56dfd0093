//! Diagnostic bundles for unrecovered failures.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ErrorCategory, Severity};
use crate::layers::layer_name;
use crate::validator::first_imbalance;

/// Approximate position of a failure in the input text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// 1-based line number.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
}

/// Everything a caller needs to act on a failed, unrecovered layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticBundle {
    pub layer_id: u32,
    pub layer_name: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub location: Option<SourceLocation>,
    /// Input lines around the failure location.
    pub context_lines: Vec<String>,
    pub elapsed_ms: u64,
    pub input_bytes: usize,
    /// Messages of previously seen errors in the same category this run.
    pub similar_seen: Vec<String>,
    /// Ranked, actionable suggestions.
    pub suggestions: Vec<String>,
}

static LINE_HINT: Lazy<Regex> = Lazy::new(|| Regex::new(r"line (\d+)").unwrap());
static BYTE_HINT: Lazy<Regex> = Lazy::new(|| Regex::new(r"byte (\d+)").unwrap());

/// Assemble the bundle for one failed layer.
pub fn build_diagnostic(
    layer_id: u32,
    code: &str,
    error: &EngineError,
    elapsed_ms: u64,
    similar_seen: Vec<String>,
) -> DiagnosticBundle {
    let location = locate(code, &error.message);
    let context_lines = location
        .map(|loc| context_around(code, loc.line))
        .unwrap_or_default();
    DiagnosticBundle {
        layer_id,
        layer_name: layer_name(layer_id),
        category: error.category,
        severity: error.category.default_severity(),
        message: error.message.clone(),
        location,
        context_lines,
        elapsed_ms,
        input_bytes: code.len(),
        similar_seen,
        suggestions: suggestions_for(error.category, layer_id),
    }
}

/// Guess a location from the error message, falling back to the first
/// bracket imbalance in the input.
fn locate(code: &str, message: &str) -> Option<SourceLocation> {
    if let Some(caps) = LINE_HINT.captures(message) {
        if let Ok(line) = caps[1].parse::<usize>() {
            return Some(SourceLocation { line, column: 1 });
        }
    }
    let byte = BYTE_HINT
        .captures(message)
        .and_then(|caps| caps[1].parse::<usize>().ok())
        .or_else(|| {
            first_imbalance(code)
                .and_then(|r| BYTE_HINT.captures(&r).and_then(|c| c[1].parse().ok()))
        })?;
    byte_to_location(code, byte)
}

fn byte_to_location(code: &str, byte: usize) -> Option<SourceLocation> {
    if byte > code.len() {
        return None;
    }
    let prefix = &code[..byte.min(code.len())];
    let line = prefix.matches('\n').count() + 1;
    let column = prefix
        .rsplit('\n')
        .next()
        .map(|l| l.chars().count() + 1)
        .unwrap_or(1);
    Some(SourceLocation { line, column })
}

/// Up to two lines on either side of `line` (1-based), prefixed with their
/// line numbers.
fn context_around(code: &str, line: usize) -> Vec<String> {
    let lines: Vec<&str> = code.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }
    let center = line.saturating_sub(1).min(lines.len() - 1);
    let start = center.saturating_sub(2);
    let end = (center + 3).min(lines.len());
    lines[start..end]
        .iter()
        .enumerate()
        .map(|(i, l)| format!("{:>4} | {}", start + i + 1, l))
        .collect()
}

/// Actionable suggestions for a failure, most useful first.
pub fn suggestions_for(category: ErrorCategory, layer_id: u32) -> Vec<String> {
    let mut out = Vec::new();
    match category {
        ErrorCategory::Syntax => {
            out.push("Fix the input's syntax errors before re-running the pipeline".to_string());
        }
        ErrorCategory::Parsing => {
            out.push(format!(
                "Re-run layer {} ({}) with the textual strategy only",
                layer_id,
                layer_name(layer_id)
            ));
            out.push("Check the reported location for unbalanced brackets".to_string());
        }
        ErrorCategory::Transformation => {
            out.push(format!(
                "Exclude layer {} ({}) and re-run the remaining layers",
                layer_id,
                layer_name(layer_id)
            ));
        }
        ErrorCategory::Filesystem => {
            out.push("Verify the referenced file exists and is readable".to_string());
        }
        ErrorCategory::Memory => {
            out.push("Split the input into smaller files and re-run".to_string());
        }
        ErrorCategory::Dependency => {
            out.push("Install the missing module or tool and retry".to_string());
        }
        ErrorCategory::Unknown => {
            out.push("Re-run with verbose logging to capture more context".to_string());
        }
    }
    if let Some(hints) = super::categorize::layer_hints(layer_id) {
        for cause in hints.common_causes {
            out.push(format!("Possible cause: {cause}"));
        }
    }
    out
}

/// Merge per-layer suggestion lists into one prioritized, deduplicated list
/// for the whole run. Bundles with higher severity surface first.
pub fn aggregate_suggestions<'a>(
    bundles: impl IntoIterator<Item = &'a DiagnosticBundle>,
) -> Vec<String> {
    let mut ranked: Vec<(Severity, &'a String)> = Vec::new();
    for bundle in bundles {
        for suggestion in &bundle.suggestions {
            ranked.push((bundle.severity, suggestion));
        }
    }
    ranked.sort_by(|a, b| b.0.cmp(&a.0));
    let mut out: Vec<String> = Vec::new();
    for (_, suggestion) in ranked {
        if !out.contains(suggestion) {
            out.push(suggestion.clone());
        }
    }
    out
}
