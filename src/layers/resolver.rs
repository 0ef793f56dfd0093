//! Dependency resolver for requested layer sets.

use std::collections::BTreeSet;

use tracing::debug;

use super::{all_layer_ids, layer, layer_name};

/// Result of normalizing a requested layer set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Sorted, unique, dependency-complete layer ids.
    pub corrected: Vec<u32>,
    /// One warning per id that was added without being explicitly requested.
    pub warnings: Vec<String>,
}

/// Normalize a requested set of layer ids into a complete, ordered set
/// satisfying inter-layer prerequisites.
///
/// An empty request means "all known layers". Duplicates collapse. Unknown
/// ids are passed through unresolved with no prerequisites assumed, which
/// favors forward compatibility over strictness.
pub fn resolve(requested: &[u32]) -> Resolution {
    let requested: Vec<u32> = if requested.is_empty() {
        all_layer_ids()
    } else {
        requested.to_vec()
    };

    let explicit: BTreeSet<u32> = requested.iter().copied().collect();
    let mut corrected = explicit.clone();
    let mut warnings = Vec::new();

    // Transitive closure over the static dependency table. BTreeSet keeps
    // the output sorted; the stack carries (dependency, requiring layer)
    // so each addition can name what pulled it in.
    let mut stack: Vec<(u32, u32)> = Vec::new();
    for &id in &explicit {
        if let Some(desc) = layer(id) {
            for &dep in desc.dependencies {
                stack.push((dep, id));
            }
        }
    }

    while let Some((dep, required_by)) = stack.pop() {
        if corrected.insert(dep) {
            debug!(layer = dep, required_by, "adding missing dependency");
            warnings.push(format!(
                "Layer {} ({}) added automatically: required by layer {} ({})",
                dep,
                layer_name(dep),
                required_by,
                layer_name(required_by)
            ));
            if let Some(desc) = layer(dep) {
                for &transitive in desc.dependencies {
                    stack.push((transitive, dep));
                }
            }
        }
    }

    Resolution {
        corrected: corrected.into_iter().collect(),
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_request_means_all_layers() {
        let r = resolve(&[]);
        assert_eq!(r.corrected, all_layer_ids());
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn test_single_layer_without_deps() {
        let r = resolve(&[1]);
        assert_eq!(r.corrected, vec![1]);
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn test_layer_four_pulls_in_transitive_closure() {
        // Requesting only layer 4 is corrected to [1, 2, 3, 4] with one
        // warning per added dependency.
        let r = resolve(&[4]);
        assert_eq!(r.corrected, vec![1, 2, 3, 4]);
        assert_eq!(r.warnings.len(), 3);
        assert!(r.warnings.iter().any(|w| w.contains("Layer 1")));
        assert!(r.warnings.iter().any(|w| w.contains("Layer 2")));
        assert!(r.warnings.iter().any(|w| w.contains("Layer 3")));
    }

    #[test]
    fn test_duplicates_collapse() {
        let r = resolve(&[2, 2, 1, 1]);
        assert_eq!(r.corrected, vec![1, 2]);
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn test_unknown_ids_pass_through() {
        let r = resolve(&[42]);
        assert_eq!(r.corrected, vec![42]);
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn test_explicitly_requested_deps_produce_no_warnings() {
        let r = resolve(&[1, 2, 3, 4]);
        assert_eq!(r.corrected, vec![1, 2, 3, 4]);
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn test_full_chain_from_top_layer() {
        let r = resolve(&[6]);
        assert_eq!(r.corrected, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(r.warnings.len(), 5);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn resolver_output_is_sorted_unique_superset(
                requested in proptest::collection::vec(0u32..10, 0..12)
            ) {
                let r = resolve(&requested);

                // Sorted ascending, no duplicates.
                let mut sorted = r.corrected.clone();
                sorted.sort_unstable();
                sorted.dedup();
                prop_assert_eq!(&r.corrected, &sorted);

                // Superset of the request (or of all layers when empty).
                let base = if requested.is_empty() {
                    all_layer_ids()
                } else {
                    requested.clone()
                };
                for id in base {
                    prop_assert!(r.corrected.contains(&id));
                }

                // Closed under dependencies; deps precede dependents.
                for &id in &r.corrected {
                    if let Some(desc) = layer(id) {
                        for dep in desc.dependencies {
                            let dep_pos = r.corrected.iter().position(|x| x == dep);
                            let id_pos = r.corrected.iter().position(|x| *x == id);
                            prop_assert!(dep_pos.is_some());
                            prop_assert!(dep_pos < id_pos);
                        }
                    }
                }
            }
        }
    }
}
