use serde::{Deserialize, Serialize};

use crate::layers;
use crate::pipeline::PipelineOptions;

/// Renovar run configuration
///
/// Deserialized from a JSON document supplied by the embedding
/// application; every section falls back to its default when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenovarConfig {
    /// Configuration schema version
    pub version: String,

    /// Layer selection
    pub layers: LayerConfig,

    /// Safety validation settings
    pub validation: ValidationConfig,

    /// Recovery settings
    pub recovery: RecoveryConfig,

    /// Worker pool settings
    pub pool: PoolConfig,
}

impl Default for RenovarConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            layers: LayerConfig::default(),
            validation: ValidationConfig::default(),
            recovery: RecoveryConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl RenovarConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Translate this configuration into per-run pipeline options.
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            layers: self.layers.enabled.clone(),
            fail_fast: self.layers.fail_fast,
            revert_unsafe: self.validation.revert_on_failure,
            strict_validation: self.validation.strict,
            recovery: self.recovery.enabled,
            max_recovery_attempts: self.recovery.max_attempts,
            ..PipelineOptions::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    /// Layer ids to run; empty means all known layers. Missing
    /// dependencies are added automatically at run time.
    pub enabled: Vec<u32>,

    /// Stop at the first failed layer instead of continuing.
    pub fail_fast: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            enabled: layers::all_layer_ids(),
            fail_fast: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Revert a layer whose output fails the safety checks.
    pub revert_on_failure: bool,

    /// Treat a reverted layer as a run failure instead of a no-op.
    pub strict: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            revert_on_failure: true,
            strict: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Attempt recovery strategies after a layer failure.
    pub enabled: bool,

    /// Upper bound on strategies tried per failure.
    pub max_attempts: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Worker thread count; 0 means size to available parallelism.
    pub workers: usize,

    /// Default wait timeout for task results, in milliseconds.
    pub wait_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            wait_timeout_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_enables_every_layer() {
        let config = RenovarConfig::default();
        assert_eq!(config.layers.enabled, vec![1, 2, 3, 4, 5, 6]);
        assert!(!config.layers.fail_fast);
        assert!(config.validation.revert_on_failure);
    }

    #[test]
    fn test_partial_document_fills_in_defaults() {
        let config =
            RenovarConfig::from_json(r#"{ "layers": { "enabled": [2, 5] } }"#).unwrap();
        assert_eq!(config.layers.enabled, vec![2, 5]);
        assert_eq!(config.pool.wait_timeout_ms, 30_000);
        assert_eq!(config.version, "1.0");
    }

    #[test]
    fn test_round_trip() {
        let config = RenovarConfig::default();
        let json = config.to_json().unwrap();
        let back = RenovarConfig::from_json(&json).unwrap();
        assert_eq!(back.layers.enabled, config.layers.enabled);
        assert_eq!(back.recovery.max_attempts, config.recovery.max_attempts);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(RenovarConfig::from_json("{ nope").is_err());
    }

    #[test]
    fn test_config_maps_onto_pipeline_options() {
        let config = RenovarConfig::from_json(
            r#"{
                "layers": { "enabled": [2, 5], "fail_fast": true },
                "validation": { "revert_on_failure": false, "strict": true },
                "recovery": { "enabled": false, "max_attempts": 2 }
            }"#,
        )
        .unwrap();
        let options = config.pipeline_options();
        assert_eq!(options.layers, vec![2, 5]);
        assert!(options.fail_fast);
        assert!(!options.revert_unsafe);
        assert!(options.strict_validation);
        assert!(!options.recovery);
        assert_eq!(options.max_recovery_attempts, 2);
        assert!(!options.dry_run);
    }
}
