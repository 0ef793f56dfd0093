//! Error taxonomy for the modernization pipeline.
//!
//! Every error raised inside this crate carries an explicit [`ErrorCategory`]
//! from its point of origin. Free-text classification via the pattern tables
//! below is a best-effort fallback reserved for errors surfaced by external
//! components (e.g. the JSON parser), never for our own errors.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories, ordered roughly from "input is hopeless" to "retry
/// might help". Fatal categories are excluded from recovery by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Input cannot be parsed at all. Fatal.
    Syntax,
    /// A structural parse step failed; textual fallback may still apply.
    Parsing,
    /// A rewrite produced an unusable result; reduced-scope retry may apply.
    Transformation,
    /// External resource unavailable. Fatal.
    Filesystem,
    /// Resource exhaustion. Fatal.
    Memory,
    /// Missing external tool or module; may be skipped or retried.
    Dependency,
    /// Unclassified; treated as medium severity with a generic recovery path.
    Unknown,
}

impl ErrorCategory {
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Parsing
                | ErrorCategory::Transformation
                | ErrorCategory::Dependency
                | ErrorCategory::Unknown
        )
    }

    pub fn default_severity(self) -> Severity {
        match self {
            ErrorCategory::Syntax | ErrorCategory::Filesystem | ErrorCategory::Memory => {
                Severity::Error
            }
            ErrorCategory::Parsing
            | ErrorCategory::Transformation
            | ErrorCategory::Dependency
            | ErrorCategory::Unknown => Severity::Warning,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::Parsing => "parsing",
            ErrorCategory::Transformation => "transformation",
            ErrorCategory::Filesystem => "filesystem",
            ErrorCategory::Memory => "memory",
            ErrorCategory::Dependency => "dependency",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity of an error event or report entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An engine failure tagged with its category at the point of origin.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{category}: {message}")]
pub struct EngineError {
    pub category: ErrorCategory,
    pub message: String,
}

impl EngineError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Syntax, message)
    }

    pub fn parsing(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Parsing, message)
    }

    pub fn transformation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transformation, message)
    }
}

/// Pattern tables for classifying foreign error text. Checked in order;
/// first match wins.
static CATEGORY_PATTERNS: Lazy<Vec<(ErrorCategory, Regex)>> = Lazy::new(|| {
    vec![
        (
            ErrorCategory::Memory,
            Regex::new(r"(?i)out of memory|allocation failed|memory exhausted").unwrap(),
        ),
        (
            ErrorCategory::Filesystem,
            Regex::new(r"(?i)no such file|permission denied|i/o error|broken pipe").unwrap(),
        ),
        (
            ErrorCategory::Dependency,
            Regex::new(r"(?i)cannot find module|missing dependency|not installed|unresolved import")
                .unwrap(),
        ),
        (
            ErrorCategory::Syntax,
            Regex::new(r"(?i)unexpected token|unexpected end of input|invalid syntax").unwrap(),
        ),
        (
            ErrorCategory::Parsing,
            Regex::new(r"(?i)pars|expected value|eof while|unterminated").unwrap(),
        ),
        (
            ErrorCategory::Transformation,
            Regex::new(r"(?i)transform|rewrite|substitution").unwrap(),
        ),
    ]
});

/// Best-effort classification of an error message produced by an external
/// component. Falls back to [`ErrorCategory::Unknown`].
pub fn categorize_message(message: &str) -> ErrorCategory {
    for (category, pattern) in CATEGORY_PATTERNS.iter() {
        if pattern.is_match(message) {
            return *category;
        }
    }
    ErrorCategory::Unknown
}
