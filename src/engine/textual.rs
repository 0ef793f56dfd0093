//! Textual substitution strategies.
//!
//! Low-risk, high-speed rewrites operating directly on the source text.
//! Below the structural threshold these are the primary strategy; above it
//! they serve as the fallback when the structural transform fails.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::EngineError;

use super::{Rewrite, Transformed};

/// Upgrades stale compiler-target values in configuration documents.
pub struct UpgradeConfigTargets;

static STALE_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""target"\s*:\s*"(?i:es3|es5|es6|es2015|es2016|es2017|es2018|es2019|es2020)""#)
        .unwrap()
});

static STALE_MODULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""module"\s*:\s*"(?i:commonjs)""#).unwrap());

impl Rewrite for UpgradeConfigTargets {
    fn name(&self) -> &'static str {
        "upgrade-config-targets"
    }

    fn apply(&self, code: &str) -> Result<Transformed, EngineError> {
        let mut changes = 0;
        let mut improvements = Vec::new();

        let target_hits = STALE_TARGET.find_iter(code).count();
        let after_target = STALE_TARGET.replace_all(code, r#""target": "ES2022""#);
        if target_hits > 0 {
            changes += target_hits;
            improvements.push(format!("Upgraded {} compilation target(s) to ES2022", target_hits));
        }

        let module_hits = STALE_MODULE.find_iter(&after_target).count();
        let after_module = STALE_MODULE.replace_all(&after_target, r#""module": "ESNext""#);
        if module_hits > 0 {
            changes += module_hits;
            improvements.push(format!("Upgraded {} module setting(s) to ESNext", module_hits));
        }

        Ok(Transformed {
            code: after_module.into_owned(),
            change_count: changes,
            improvements,
        })
    }
}

/// Replaces HTML entities with the characters they encode.
pub struct DecodeEntities;

// `&amp;` goes last so the other entities are consumed before ampersands.
const ENTITIES: &[(&str, &str)] = &[
    ("&quot;", "\""),
    ("&#34;", "\""),
    ("&apos;", "'"),
    ("&#39;", "'"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&nbsp;", " "),
    ("&amp;", "&"),
];

impl Rewrite for DecodeEntities {
    fn name(&self) -> &'static str {
        "decode-entities"
    }

    fn apply(&self, code: &str) -> Result<Transformed, EngineError> {
        // Numeric entities must be digits terminated by a semicolon; anything
        // else would decode to garbage, so the whole pass refuses.
        for (idx, _) in code.match_indices("&#") {
            let tail = &code[idx + 2..];
            let digits = tail.chars().take_while(|c| c.is_ascii_digit()).count();
            if digits == 0 || tail.chars().nth(digits) != Some(';') {
                return Err(EngineError::transformation(format!(
                    "malformed numeric entity at byte {idx}"
                )));
            }
        }
        let mut out = code.to_string();
        let mut changes = 0;
        for (entity, replacement) in ENTITIES {
            let hits = out.matches(entity).count();
            if hits > 0 {
                out = out.replace(entity, replacement);
                changes += hits;
            }
        }
        let improvements = if changes > 0 {
            vec![format!("Decoded {} HTML entit(ies)", changes)]
        } else {
            Vec::new()
        };
        Ok(Transformed {
            code: out,
            change_count: changes,
            improvements,
        })
    }
}

/// Drops exact duplicate import lines. Fallback for the structural merge.
pub struct DedupeImportLines;

impl Rewrite for DedupeImportLines {
    fn name(&self) -> &'static str {
        "dedupe-import-lines"
    }

    fn apply(&self, code: &str) -> Result<Transformed, EngineError> {
        let mut seen: Vec<&str> = Vec::new();
        let mut kept: Vec<&str> = Vec::new();
        let mut dropped = 0;
        for line in code.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with("import ") || trimmed.starts_with("import\"")
                || trimmed.starts_with("import'")
            {
                if seen.contains(&trimmed) {
                    dropped += 1;
                    continue;
                }
                seen.push(trimmed);
            }
            kept.push(line);
        }
        let improvements = if dropped > 0 {
            vec![format!("Removed {} duplicate import(s)", dropped)]
        } else {
            Vec::new()
        };
        Ok(Transformed {
            code: rejoin(code, kept),
            change_count: dropped,
            improvements,
        })
    }
}

pub(super) static DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:function\s+(?P<f>[A-Z]\w*)\s*\(|const\s+(?P<c>[A-Z]\w*)\s*=)").unwrap()
});

/// Prefixes un-exported capitalized declarations with `export` when the file
/// returns markup. Fallback for the structural component pass.
pub struct ExportComponentsTextual;

impl Rewrite for ExportComponentsTextual {
    fn name(&self) -> &'static str {
        "export-components-textual"
    }

    fn apply(&self, code: &str) -> Result<Transformed, EngineError> {
        if !has_markup_return(code) {
            return Ok(Transformed::unchanged(code));
        }
        let mut out: Vec<String> = Vec::new();
        let mut changes = 0;
        let mut improvements = Vec::new();
        for line in code.lines() {
            if let Some(caps) = DECLARATION.captures(line.trim_start()) {
                let name = caps
                    .name("f")
                    .or_else(|| caps.name("c"))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                if !is_exported(code, name) {
                    let indent_len = line.len() - line.trim_start().len();
                    let (indent, rest) = line.split_at(indent_len);
                    out.push(format!("{indent}export {rest}"));
                    changes += 1;
                    improvements.push(format!("Exported component {}", name));
                    continue;
                }
            }
            out.push(line.to_string());
        }
        Ok(Transformed {
            code: rejoin(code, out.iter().map(|s| s.as_str()).collect()),
            change_count: changes,
            improvements,
        })
    }
}

/// Rewrites leading `var` keywords to `let`. Fallback for the scope-aware
/// structural pass, which can distinguish `let` from `const`.
pub struct VarToLetTextual;

static VAR_DECL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(\s*)var\b").unwrap());

impl Rewrite for VarToLetTextual {
    fn name(&self) -> &'static str {
        "var-to-let-textual"
    }

    fn apply(&self, code: &str) -> Result<Transformed, EngineError> {
        let hits = VAR_DECL.find_iter(code).count();
        let out = VAR_DECL.replace_all(code, "${1}let");
        let improvements = if hits > 0 {
            vec![format!("Rewrote {} var declaration(s) to let", hits)]
        } else {
            Vec::new()
        };
        Ok(Transformed {
            code: out.into_owned(),
            change_count: hits,
            improvements,
        })
    }
}

/// Drops single-line `console.*` calls and `debugger;` statements.
pub struct StripDebugTextual;

impl Rewrite for StripDebugTextual {
    fn name(&self) -> &'static str {
        "strip-debug-textual"
    }

    fn apply(&self, code: &str) -> Result<Transformed, EngineError> {
        let mut kept: Vec<&str> = Vec::new();
        let mut dropped = 0;
        for line in code.lines() {
            let trimmed = line.trim();
            if trimmed == "debugger;" || trimmed == "debugger" {
                dropped += 1;
                continue;
            }
            if trimmed.starts_with("console.") && trimmed.ends_with(';') {
                dropped += 1;
                continue;
            }
            kept.push(line);
        }
        let improvements = if dropped > 0 {
            vec![format!("Removed {} debug statement(s)", dropped)]
        } else {
            Vec::new()
        };
        Ok(Transformed {
            code: rejoin(code, kept),
            change_count: dropped,
            improvements,
        })
    }
}

/// Rejoin kept lines, preserving the input's trailing newline if present.
pub(super) fn rejoin(original: &str, lines: Vec<&str>) -> String {
    let mut out = lines.join("\n");
    if original.ends_with('\n') && !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Heuristic: the file contains at least one markup-returning statement.
pub(super) fn has_markup_return(code: &str) -> bool {
    code.contains("return <") || code.contains("return (")
}

/// Heuristic: `name` already appears, as a whole identifier, in some export
/// statement.
pub(super) fn is_exported(code: &str, name: &str) -> bool {
    if name.is_empty() {
        return true;
    }
    for line in code.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("export ") && crate::validator::contains_word(trimmed, name) {
            return true;
        }
    }
    false
}
