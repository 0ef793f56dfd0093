//! Structural (parse-based) rewrite strategies.
//!
//! These do a real, if lightweight, parse of the input before rewriting:
//! statement gathering for imports, a bracket-nesting scan before any
//! body-level rewrite. A failed parse returns a `parsing`-tagged error and
//! the engine falls back to the textual equivalent.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::EngineError;
use crate::validator::first_imbalance;

use super::textual::{has_markup_return, is_exported, rejoin, DECLARATION};
use super::{Rewrite, Transformed};

/// Merges duplicate import statements per module specifier.
pub struct MergeImports;

static FROM_SPEC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"from\s+['"]([^'"]+)['"]"#).unwrap());
static NAMED_SPECS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^}]*)\}").unwrap());
static DEFAULT_SPEC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^import\s+([A-Za-z_$][\w$]*)").unwrap());
static SIDE_EFFECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^import\s+['"]([^'"]+)['"]"#).unwrap());

#[derive(Debug)]
struct ImportStmt {
    raw: String,
    module: String,
    default: Option<String>,
    named: Vec<String>,
    side_effect: bool,
    namespace: bool,
}

fn parse_import(stmt: &str) -> Result<ImportStmt, EngineError> {
    let flat = stmt.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some(caps) = SIDE_EFFECT.captures(&flat) {
        return Ok(ImportStmt {
            raw: flat.clone(),
            module: caps[1].to_string(),
            default: None,
            named: Vec::new(),
            side_effect: true,
            namespace: false,
        });
    }
    let module = FROM_SPEC
        .captures(&flat)
        .map(|c| c[1].to_string())
        .ok_or_else(|| EngineError::parsing("import missing module specifier"))?;
    let namespace = flat.contains("* as ");
    let named = NAMED_SPECS
        .captures(&flat)
        .map(|c| {
            c[1].split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let default = DEFAULT_SPEC.captures(&flat).map(|c| c[1].to_string());
    Ok(ImportStmt {
        raw: flat,
        module,
        default,
        named,
        side_effect: false,
        namespace,
    })
}

fn brace_delta(line: &str) -> i32 {
    let opens = line.matches('{').count() as i32;
    let closes = line.matches('}').count() as i32;
    opens - closes
}

fn render_import(module: &str, default: Option<&str>, named: &[String]) -> String {
    match (default, named.is_empty()) {
        (Some(d), true) => format!("import {d} from '{module}';"),
        (Some(d), false) => format!("import {d}, {{ {} }} from '{module}';", named.join(", ")),
        (None, false) => format!("import {{ {} }} from '{module}';", named.join(", ")),
        (None, true) => format!("import '{module}';"),
    }
}

impl Rewrite for MergeImports {
    fn name(&self) -> &'static str {
        "merge-imports"
    }

    fn apply(&self, code: &str) -> Result<Transformed, EngineError> {
        let lines: Vec<&str> = code.lines().collect();
        let mut i = 0;
        let mut leading: Vec<&str> = Vec::new();
        let mut interleaved: Vec<&str> = Vec::new();
        let mut imports: Vec<ImportStmt> = Vec::new();

        // Gather the leading import block: blank lines and line comments may
        // sit between statements; anything else ends the block. Lines that
        // are not imports are kept, re-emitted after the merged block.
        while i < lines.len() {
            let trimmed = lines[i].trim();
            if trimmed.is_empty() || trimmed.starts_with("//") {
                if imports.is_empty() {
                    leading.push(lines[i]);
                } else {
                    interleaved.push(lines[i]);
                }
                i += 1;
                continue;
            }
            if !trimmed.starts_with("import") {
                break;
            }
            let mut stmt = lines[i].to_string();
            let mut depth = brace_delta(lines[i]);
            i += 1;
            while depth > 0 || !stmt.trim_end().ends_with(';') {
                if i >= lines.len() {
                    return Err(EngineError::parsing("unterminated import statement"));
                }
                stmt.push('\n');
                stmt.push_str(lines[i]);
                depth += brace_delta(lines[i]);
                i += 1;
            }
            imports.push(parse_import(&stmt)?);
        }

        if imports.is_empty() {
            return Ok(Transformed::unchanged(code));
        }
        let original_count = imports.len();

        // An import binding nothing can only be dropped.
        let mut dropped_empty = 0;
        imports.retain(|s| {
            let empty =
                !s.side_effect && !s.namespace && s.default.is_none() && s.named.is_empty();
            if empty {
                dropped_empty += 1;
            }
            !empty
        });

        // Merge by module, preserving first-seen order.
        let mut merged: Vec<ImportStmt> = Vec::new();
        for stmt in imports {
            if stmt.namespace {
                // Namespace imports are kept verbatim, deduped by text.
                if !merged.iter().any(|m| m.namespace && m.raw == stmt.raw) {
                    merged.push(stmt);
                }
                continue;
            }
            let key = format!("{}:{}", stmt.side_effect, stmt.module);
            if let Some(existing) = merged
                .iter_mut()
                .find(|m| !m.namespace && format!("{}:{}", m.side_effect, m.module) == key)
            {
                if existing.default.is_none() {
                    existing.default = stmt.default;
                }
                for name in stmt.named {
                    if !existing.named.contains(&name) {
                        existing.named.push(name);
                    }
                }
            } else {
                merged.push(stmt);
            }
        }

        let removed = original_count.saturating_sub(merged.len());
        if removed == 0 {
            return Ok(Transformed::unchanged(code));
        }
        let merged_away = removed - dropped_empty;

        let mut out: Vec<String> = leading.iter().map(|s| s.to_string()).collect();
        for stmt in &merged {
            if stmt.namespace {
                out.push(stmt.raw.clone());
            } else {
                out.push(render_import(
                    &stmt.module,
                    stmt.default.as_deref(),
                    &stmt.named,
                ));
            }
        }
        for line in &interleaved {
            out.push(line.to_string());
        }
        for line in &lines[i..] {
            out.push(line.to_string());
        }
        let mut improvements = Vec::new();
        if merged_away > 0 {
            improvements.push(format!(
                "Merged {} duplicate import statement(s)",
                merged_away
            ));
        }
        if dropped_empty > 0 {
            improvements.push(format!("Dropped {} empty import(s)", dropped_empty));
        }
        Ok(Transformed {
            code: rejoin(code, out.iter().map(|s| s.as_str()).collect()),
            change_count: removed,
            improvements,
        })
    }
}

/// Adds missing `export` keywords to capitalized declarations whose bodies
/// return markup.
pub struct ExportComponents;

impl Rewrite for ExportComponents {
    fn name(&self) -> &'static str {
        "export-components"
    }

    fn apply(&self, code: &str) -> Result<Transformed, EngineError> {
        if let Some(reason) = first_imbalance(code) {
            return Err(EngineError::parsing(reason));
        }
        let lines: Vec<&str> = code.lines().collect();
        let mut to_export: Vec<(usize, String)> = Vec::new();
        let mut depth: i32 = 0;

        for (idx, line) in lines.iter().enumerate() {
            let trimmed = line.trim_start();
            if depth == 0 {
                if let Some(caps) = DECLARATION.captures(trimmed) {
                    let name = caps
                        .name("f")
                        .or_else(|| caps.name("c"))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default();
                    if !is_exported(code, &name) && body_returns_markup(&lines, idx) {
                        to_export.push((idx, name));
                    }
                }
            }
            depth += brace_delta(line);
        }

        if to_export.is_empty() {
            return Ok(Transformed::unchanged(code));
        }

        let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        let mut improvements = Vec::new();
        for (idx, name) in &to_export {
            let line = &out[*idx];
            let indent_len = line.len() - line.trim_start().len();
            let (indent, rest) = line.split_at(indent_len);
            out[*idx] = format!("{indent}export {rest}");
            improvements.push(format!("Exported component {}", name));
        }
        Ok(Transformed {
            code: rejoin(code, out.iter().map(|s| s.as_str()).collect()),
            change_count: to_export.len(),
            improvements,
        })
    }
}

/// True when the declaration starting at `start` has a body (or arrow
/// expression) that returns markup.
fn body_returns_markup(lines: &[&str], start: usize) -> bool {
    if lines[start].contains("=> <") || lines[start].contains("=> (") {
        return true;
    }
    let mut depth = 0;
    let mut entered = false;
    for line in &lines[start..] {
        if has_markup_return(line) {
            return true;
        }
        depth += brace_delta(line);
        if depth > 0 {
            entered = true;
        }
        if entered && depth <= 0 {
            break;
        }
    }
    false
}

/// Rewrites `var` declarations to `const` when never reassigned, `let`
/// otherwise.
pub struct VarToLetConst;

static VAR_STMT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(?P<indent>\s*)var\s+(?P<name>[A-Za-z_$][\w$]*)").unwrap());

impl Rewrite for VarToLetConst {
    fn name(&self) -> &'static str {
        "var-to-let-const"
    }

    fn apply(&self, code: &str) -> Result<Transformed, EngineError> {
        if let Some(reason) = first_imbalance(code) {
            return Err(EngineError::parsing(reason));
        }

        // (byte range of the `var` keyword, replacement keyword)
        let mut edits: Vec<(std::ops::Range<usize>, &'static str)> = Vec::new();
        let mut improvements = Vec::new();
        for caps in VAR_STMT.captures_iter(code) {
            let indent = caps.name("indent").map(|m| m.as_str().len()).unwrap_or(0);
            let name = &caps["name"];
            let full = caps.get(0).ok_or_else(|| {
                EngineError::transformation("var declaration match vanished")
            })?;
            let kw_start = full.start() + indent;
            let keyword = if is_reassigned(code, name, full.end()) {
                "let"
            } else {
                "const"
            };
            improvements.push(format!("Rewrote var {} to {}", name, keyword));
            edits.push((kw_start..kw_start + 3, keyword));
        }

        if edits.is_empty() {
            return Ok(Transformed::unchanged(code));
        }

        let mut out = String::with_capacity(code.len());
        let mut cursor = 0;
        for (range, keyword) in &edits {
            out.push_str(&code[cursor..range.start]);
            out.push_str(keyword);
            cursor = range.end;
        }
        out.push_str(&code[cursor..]);
        Ok(Transformed {
            change_count: edits.len(),
            code: out,
            improvements,
        })
    }
}

/// Whether `name` is written again anywhere after its declaration.
fn is_reassigned(code: &str, name: &str, after: usize) -> bool {
    let tail = &code[after..];
    let pattern = format!(
        r"\b{}\s*(?:[+\-*/%]?=[^=]|\+\+|--)",
        regex::escape(name)
    );
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(tail),
        // An unparseable identifier pattern means we cannot prove
        // immutability; `let` is the safe rewrite.
        Err(_) => true,
    }
}

/// Removes `console.*` call statements and `debugger;` statements.
pub struct StripDebugStatements;

impl Rewrite for StripDebugStatements {
    fn name(&self) -> &'static str {
        "strip-debug-statements"
    }

    fn apply(&self, code: &str) -> Result<Transformed, EngineError> {
        if let Some(reason) = first_imbalance(code) {
            return Err(EngineError::parsing(reason));
        }
        let lines: Vec<&str> = code.lines().collect();
        let mut kept: Vec<&str> = Vec::new();
        let mut removed = 0;
        let mut i = 0;
        while i < lines.len() {
            let trimmed = lines[i].trim();
            if trimmed == "debugger;" || trimmed == "debugger" {
                removed += 1;
                i += 1;
                continue;
            }
            if trimmed.starts_with("console.") {
                // Consume the whole call statement, which may span lines.
                let mut depth = paren_delta(lines[i]);
                let mut end = i;
                while depth > 0 {
                    end += 1;
                    if end >= lines.len() {
                        return Err(EngineError::parsing("unterminated console call"));
                    }
                    depth += paren_delta(lines[end]);
                }
                removed += 1;
                i = end + 1;
                continue;
            }
            kept.push(lines[i]);
            i += 1;
        }
        if removed == 0 {
            return Ok(Transformed::unchanged(code));
        }
        Ok(Transformed {
            code: rejoin(code, kept),
            change_count: removed,
            improvements: vec![format!("Removed {} debug statement(s)", removed)],
        })
    }
}

fn paren_delta(line: &str) -> i32 {
    let opens = line.matches('(').count() as i32;
    let closes = line.matches(')').count() as i32;
    opens - closes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_imports_same_module() {
        let input = "import { a } from 'mod';\nimport { b } from 'mod';\n\nconst x = 1;\n";
        let t = MergeImports.apply(input).unwrap();
        assert_eq!(t.change_count, 1);
        assert!(t.code.contains("import { a, b } from 'mod';"));
        assert!(t.code.contains("const x = 1;"));
    }

    #[test]
    fn test_merge_imports_default_and_named() {
        let input = "import React from 'react';\nimport { useState } from 'react';\n";
        let t = MergeImports.apply(input).unwrap();
        assert_eq!(t.change_count, 1);
        assert!(t.code.contains("import React, { useState } from 'react';"));
    }

    #[test]
    fn test_merge_imports_is_idempotent() {
        let input = "import { a } from 'x';\nimport { b } from 'x';\nbody();\n";
        let first = MergeImports.apply(input).unwrap();
        let second = MergeImports.apply(&first.code).unwrap();
        assert_eq!(second.change_count, 0);
        assert_eq!(second.code, first.code);
    }

    #[test]
    fn test_merge_imports_keeps_interleaved_comments() {
        let input = "import { a } from 'x';\n// licensing note\nimport { b } from 'x';\ncode();\n";
        let t = MergeImports.apply(input).unwrap();
        assert_eq!(t.change_count, 1);
        assert_eq!(
            t.code,
            "import { a, b } from 'x';\n// licensing note\ncode();\n"
        );
    }

    #[test]
    fn test_merge_imports_keeps_blank_line_before_body() {
        let input = "import { a } from 'x';\nimport { b } from 'x';\n\nconst y = 1;\n";
        let t = MergeImports.apply(input).unwrap();
        assert_eq!(t.code, "import { a, b } from 'x';\n\nconst y = 1;\n");
    }

    #[test]
    fn test_merge_imports_drops_empty_specifier_list() {
        let input = "import {} from 'mod';\nconst x = 1;\n";
        let t = MergeImports.apply(input).unwrap();
        assert_eq!(t.change_count, 1);
        assert!(!t.code.contains("import"));
        assert!(t.code.contains("const x = 1;"));
    }

    #[test]
    fn test_merge_imports_keeps_side_effect_imports() {
        let input = "import './styles.css';\nimport './styles.css';\nconst x = 1;\n";
        let t = MergeImports.apply(input).unwrap();
        assert_eq!(t.change_count, 1);
        assert!(t.code.contains("import './styles.css';"));
    }

    #[test]
    fn test_merge_imports_unterminated_block() {
        let err = MergeImports.apply("import {\n").unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::Parsing);
    }

    #[test]
    fn test_merge_imports_multiline_statement() {
        let input = "import {\n  a,\n  b,\n} from 'mod';\nimport { c } from 'mod';\n";
        let t = MergeImports.apply(input).unwrap();
        assert_eq!(t.change_count, 1);
        assert!(t.code.contains("import { a, b, c } from 'mod';"));
    }

    #[test]
    fn test_export_components_structural() {
        let input = "function Card() {\n  return <div/>;\n}\n";
        let t = ExportComponents.apply(input).unwrap();
        assert_eq!(t.change_count, 1);
        assert!(t.code.starts_with("export function Card()"));
    }

    #[test]
    fn test_export_components_rejects_unbalanced() {
        let err = ExportComponents.apply("function Card() {\n  return <div/>;\n").unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::Parsing);
    }

    #[test]
    fn test_export_components_ignores_helpers() {
        let input = "function helper() {\n  return 1;\n}\n";
        let t = ExportComponents.apply(input).unwrap();
        assert_eq!(t.change_count, 0);
        assert_eq!(t.code, input);
    }

    #[test]
    fn test_var_to_const_when_never_reassigned() {
        let t = VarToLetConst.apply("var x = 1;\n").unwrap();
        assert_eq!(t.code, "const x = 1;\n");
    }

    #[test]
    fn test_var_to_let_when_reassigned() {
        let t = VarToLetConst.apply("var x = 1;\nx = 2;\n").unwrap();
        assert_eq!(t.code, "let x = 1;\nx = 2;\n");
    }

    #[test]
    fn test_var_to_let_on_increment() {
        let t = VarToLetConst.apply("var i = 0;\ni++;\n").unwrap();
        assert_eq!(t.code, "let i = 0;\ni++;\n");
    }

    #[test]
    fn test_strip_debug_multiline_console() {
        let input = "console.log(\n  value,\n);\nconst a = 1;\n";
        let t = StripDebugStatements.apply(input).unwrap();
        assert_eq!(t.change_count, 1);
        assert_eq!(t.code, "const a = 1;\n");
    }

    #[test]
    fn test_strip_debug_unterminated_call() {
        let err = StripDebugStatements.apply("console.log((1;\n").unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::Parsing);
    }
}
