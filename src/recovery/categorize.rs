//! Failure categorization.
//!
//! Errors raised inside the engine carry their category from the point of
//! origin, so categorization is a field read. Pattern matching over free
//! text is reserved for errors surfaced by external components.

use crate::error::{categorize_message, EngineError, ErrorCategory};

use super::strategies::StrategyKind;

/// Category of an engine failure. The explicit origin tag always wins.
pub fn categorize(error: &EngineError) -> ErrorCategory {
    error.category
}

/// Best-effort category for an error message from an uncontrolled source.
pub fn categorize_foreign(message: &str) -> ErrorCategory {
    categorize_message(message)
}

/// Layer-specific failure knowledge: likely causes and the recovery
/// strategies worth trying, in priority order.
#[derive(Debug)]
pub struct LayerHints {
    pub common_causes: &'static [&'static str],
    pub candidates: &'static [StrategyKind],
}

pub fn layer_hints(layer_id: u32) -> Option<&'static LayerHints> {
    match layer_id {
        1 => Some(&LayerHints {
            common_causes: &["configuration document is not valid JSON"],
            candidates: &[StrategyKind::TextualFallback],
        }),
        2 => Some(&LayerHints {
            common_causes: &["double-encoded entities in the input"],
            candidates: &[StrategyKind::TextualFallback],
        }),
        3 => Some(&LayerHints {
            common_causes: &[
                "import statement spans lines without a closing brace",
                "import statement missing a trailing semicolon",
            ],
            candidates: &[
                StrategyKind::TextualFallback,
                StrategyKind::SyntaxRepair,
                StrategyKind::PartialTransform,
            ],
        }),
        4 => Some(&LayerHints {
            common_causes: &["component body has unbalanced braces"],
            candidates: &[
                StrategyKind::SyntaxRepair,
                StrategyKind::TextualFallback,
                StrategyKind::SkipLayer,
            ],
        }),
        5 => Some(&LayerHints {
            common_causes: &["unbalanced brackets before the var declaration"],
            candidates: &[
                StrategyKind::SyntaxRepair,
                StrategyKind::TextualFallback,
                StrategyKind::PartialTransform,
            ],
        }),
        6 => Some(&LayerHints {
            common_causes: &["console call spans lines without closing parens"],
            candidates: &[
                StrategyKind::TextualFallback,
                StrategyKind::PartialTransform,
                StrategyKind::SkipLayer,
            ],
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_tag_wins_over_message_text() {
        // The message mentions memory, but the origin tagged it as parsing.
        let e = EngineError::parsing("allocation failed while parsing");
        assert_eq!(categorize(&e), ErrorCategory::Parsing);
    }

    #[test]
    fn test_foreign_text_falls_back_to_patterns() {
        assert_eq!(
            categorize_foreign("ENOENT: no such file or directory"),
            ErrorCategory::Filesystem
        );
    }

    #[test]
    fn test_every_known_layer_has_hints() {
        for id in crate::layers::all_layer_ids() {
            assert!(layer_hints(id).is_some(), "layer {id} has no hints");
        }
        assert!(layer_hints(99).is_none());
    }
}
