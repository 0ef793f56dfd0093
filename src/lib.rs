// Library exports for the Renovar modernization engine
pub mod config;
pub mod engine;
pub mod error;
pub mod layers;
pub mod pipeline;
pub mod pool;
pub mod recovery;
pub mod state;
pub mod timing;
pub mod tracker;
pub mod validator;

// Re-export key types for convenience
pub use config::RenovarConfig;
pub use engine::{Engine, ExecutionOutcome, Transformed};
pub use error::{EngineError, ErrorCategory, Severity};
pub use layers::{resolve, LayerDescriptor, Resolution};
pub use pipeline::{
    Disposition, PipelineOptions, PipelineReport, PipelineStats, PostRunCheck,
    TransformationPipeline, TransformationResult,
};
pub use pool::{JobRunner, PipelineJob, Task, TaskKind, TaskResult, WorkerPool};
pub use recovery::{RecoveryAttempt, RecoveryReport};
pub use state::{PipelineSnapshot, StateTracker};
pub use tracker::{ErrorRecord, ErrorTracker, TrackerStats, TrendWindow};
pub use validator::Verdict;
