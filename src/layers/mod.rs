//! Modernization layer registry.
//!
//! Layers are the ordered, dependency-constrained stages of the pipeline.
//! The registry is static and read-only for the process lifetime; the
//! resolver computes dependency closures over it.

mod resolver;

pub use resolver::{resolve, Resolution};

use once_cell::sync::Lazy;
use serde::Serialize;

/// Layers below this id use direct textual substitution only; layers at or
/// above it attempt a structural transform first with a textual fallback.
pub const STRUCTURAL_THRESHOLD: u32 = 3;

/// Static description of one modernization layer.
#[derive(Debug, Clone, Serialize)]
pub struct LayerDescriptor {
    pub id: u32,
    pub name: &'static str,
    pub description: &'static str,
    pub dependencies: &'static [u32],
}

static LAYERS: Lazy<Vec<LayerDescriptor>> = Lazy::new(|| {
    vec![
        LayerDescriptor {
            id: 1,
            name: "config",
            description: "Upgrade compiler target values in configuration documents",
            dependencies: &[],
        },
        LayerDescriptor {
            id: 2,
            name: "entities",
            description: "Replace HTML entities with their literal characters",
            dependencies: &[],
        },
        LayerDescriptor {
            id: 3,
            name: "imports",
            description: "Dedupe and merge import statements",
            dependencies: &[2],
        },
        LayerDescriptor {
            id: 4,
            name: "components",
            description: "Export component functions that return markup",
            dependencies: &[1, 3],
        },
        LayerDescriptor {
            id: 5,
            name: "modern-syntax",
            description: "Rewrite var declarations to let/const",
            dependencies: &[3],
        },
        LayerDescriptor {
            id: 6,
            name: "cleanup",
            description: "Strip console calls and debugger statements",
            dependencies: &[4, 5],
        },
    ]
});

/// Look up a layer by id. Unknown ids return `None`.
pub fn layer(id: u32) -> Option<&'static LayerDescriptor> {
    LAYERS.iter().find(|l| l.id == id)
}

/// All known layer ids, ascending.
pub fn all_layer_ids() -> Vec<u32> {
    LAYERS.iter().map(|l| l.id).collect()
}

/// Human-readable name for a layer id, falling back to the id itself.
pub fn layer_name(id: u32) -> String {
    layer(id)
        .map(|l| l.name.to_string())
        .unwrap_or_else(|| format!("layer-{id}"))
}
