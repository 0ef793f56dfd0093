//! Append-only pipeline state tracker.
//!
//! Records the code after every accepted layer for diagnostics and optional
//! manual rollback. It never alters pipeline control flow.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::timing;

/// One accepted intermediate state. Step 0 is the initial input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub step: usize,
    pub layer_id: Option<u32>,
    pub code: String,
    pub timestamp_ms: u64,
    pub description: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("invalid step {requested}: history has {available} step(s)")]
    InvalidStep { requested: usize, available: usize },
}

/// Ordered history of accepted states. Entries are appended, never mutated.
#[derive(Debug, Clone)]
pub struct StateTracker {
    snapshots: Vec<PipelineSnapshot>,
}

impl StateTracker {
    /// Seed the history with the initial input at step 0.
    pub fn new(initial_code: &str) -> Self {
        Self {
            snapshots: vec![PipelineSnapshot {
                step: 0,
                layer_id: None,
                code: initial_code.to_string(),
                timestamp_ms: timing::unix_ms(),
                description: "initial input".to_string(),
            }],
        }
    }

    /// Append the state after an accepted (non-reverted, non-failed) layer.
    pub fn record(&mut self, layer_id: u32, code: &str, description: impl Into<String>) {
        let step = self.snapshots.len();
        self.snapshots.push(PipelineSnapshot {
            step,
            layer_id: Some(layer_id),
            code: code.to_string(),
            timestamp_ms: timing::unix_ms(),
            description: description.into(),
        });
    }

    /// The code recorded at `step`.
    pub fn rollback_to(&self, step: usize) -> Result<&str, StateError> {
        self.snapshots
            .get(step)
            .map(|s| s.code.as_str())
            .ok_or(StateError::InvalidStep {
                requested: step,
                available: self.snapshots.len(),
            })
    }

    pub fn snapshots(&self) -> &[PipelineSnapshot] {
        &self.snapshots
    }

    /// The most recently accepted code.
    pub fn current(&self) -> &str {
        // The constructor guarantees at least the step-0 snapshot.
        self.snapshots
            .last()
            .map(|s| s.code.as_str())
            .unwrap_or_default()
    }
}
