//! Pipeline types and trait definitions.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCategory, Severity};

/// How one resolved layer ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Applied,
    Reverted,
    Failed,
    Skipped,
}

/// Per-layer execution record, one per resolved layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationResult {
    pub layer_id: u32,
    pub layer_name: String,
    pub disposition: Disposition,
    /// False only for `Failed`; a revert is a successful step whose effect
    /// is "no change applied".
    pub success: bool,
    pub change_count: usize,
    pub improvements: Vec<String>,
    pub used_fallback: bool,
    pub error: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub severity: Option<Severity>,
    pub suggestion: Option<String>,
    pub recovery_options: Vec<String>,
    pub reverted: bool,
    pub revert_reason: Option<String>,
    /// Winning recovery strategy, when the layer was rescued.
    pub recovered_by: Option<String>,
    pub execution_time_ms: u64,
}

impl TransformationResult {
    pub(crate) fn skipped(layer_id: u32, reason: impl Into<String>) -> Self {
        Self {
            layer_id,
            layer_name: crate::layers::layer_name(layer_id),
            disposition: Disposition::Skipped,
            success: true,
            change_count: 0,
            improvements: Vec::new(),
            used_fallback: false,
            error: None,
            error_category: None,
            severity: None,
            suggestion: Some(reason.into()),
            recovery_options: Vec::new(),
            reverted: false,
            revert_reason: None,
            recovered_by: None,
            execution_time_ms: 0,
        }
    }
}

/// File-kind hint derived from the optional path, used solely to pick which
/// layers apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Config,
    Source,
    Unknown,
}

pub(crate) fn file_kind(path_hint: Option<&str>) -> FileKind {
    let Some(path) = path_hint else {
        return FileKind::Unknown;
    };
    let name = path.rsplit('/').next().unwrap_or(path);
    if name.ends_with(".json") || name.contains("config") || name == ".babelrc" {
        FileKind::Config
    } else if name.ends_with(".js")
        || name.ends_with(".jsx")
        || name.ends_with(".ts")
        || name.ends_with(".tsx")
    {
        FileKind::Source
    } else {
        FileKind::Unknown
    }
}

/// Execution flags for one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Requested layer ids; empty means all known layers.
    pub layers: Vec<u32>,
    /// Optional path used solely to select file-kind behavior.
    pub path_hint: Option<String>,
    pub dry_run: bool,
    pub verbose: bool,
    pub fail_fast: bool,
    /// Revert a layer whose output fails the safety checks. Off means
    /// every engine success is applied unvalidated.
    pub revert_unsafe: bool,
    /// Count reverted layers against the overall success flag.
    pub strict_validation: bool,
    /// Attempt recovery strategies after a layer failure.
    pub recovery: bool,
    /// Upper bound on strategies tried per failure.
    pub max_recovery_attempts: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            path_hint: None,
            dry_run: false,
            verbose: false,
            fail_fast: false,
            revert_unsafe: true,
            strict_validation: false,
            recovery: true,
            max_recovery_attempts: 4,
        }
    }
}

/// Aggregate run statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_layers: usize,
    pub successful_layers: usize,
    pub failed_layers: usize,
    pub total_execution_time_ms: u64,
}

/// Final output of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    /// True when no layer failed and the post-run check (if any) passed.
    pub success: bool,
    /// Final transformed text. Under `dry_run` the caller decides whether
    /// to apply it.
    pub code: String,
    pub results: Vec<TransformationResult>,
    pub stats: PipelineStats,
    /// Resolver warnings for dependency-added layers.
    pub warnings: Vec<String>,
    /// Ranked recovery suggestions aggregated across failed layers.
    pub suggestions: Vec<String>,
    /// Populated when the post-run validation hook fails.
    pub diagnostics: Option<String>,
    /// Accepted intermediate states, step 0 being the initial input.
    pub snapshots: Vec<crate::state::PipelineSnapshot>,
    pub dry_run: bool,
}

/// Post-pipeline validation hook, e.g. an external build or compile check.
/// Its verdict merges into the overall `success` flag but never alters
/// individual layer results.
pub trait PostRunCheck: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, code: &str) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_kind_config() {
        assert_eq!(file_kind(Some("tsconfig.json")), FileKind::Config);
        assert_eq!(file_kind(Some("next.config.js")), FileKind::Config);
        assert_eq!(file_kind(Some("app/.babelrc")), FileKind::Config);
    }

    #[test]
    fn test_file_kind_source() {
        assert_eq!(file_kind(Some("src/App.tsx")), FileKind::Source);
        assert_eq!(file_kind(Some("lib/util.js")), FileKind::Source);
    }

    #[test]
    fn test_file_kind_unknown() {
        assert_eq!(file_kind(None), FileKind::Unknown);
        assert_eq!(file_kind(Some("README.md")), FileKind::Unknown);
    }

    #[test]
    fn test_skipped_result_is_successful() {
        let r = TransformationResult::skipped(3, "not applicable");
        assert_eq!(r.disposition, Disposition::Skipped);
        assert!(r.success);
        assert_eq!(r.change_count, 0);
    }

    #[test]
    fn test_result_serialization_round_trip() {
        let r = TransformationResult::skipped(1, "because");
        let json = serde_json::to_string(&r).unwrap();
        let back: TransformationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.layer_id, 1);
        assert_eq!(back.disposition, Disposition::Skipped);
    }
}
