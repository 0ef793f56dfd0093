//! Layered modernization pipeline.
//!
//! The pipeline resolves the requested layer set, executes layers in
//! ascending order through the transformation engine, validates each result
//! for structural safety, reverts unsafe ones, attempts recovery for failed
//! ones, and returns a per-layer report plus the final text.

mod execution;
mod types;

pub use execution::TransformationPipeline;
pub use types::{
    Disposition, FileKind, PipelineOptions, PipelineReport, PipelineStats, PostRunCheck,
    TransformationResult,
};
