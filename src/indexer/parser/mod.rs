// Language parsers and the tree helpers they share

mod javascript;
mod python;
mod rust;

pub use javascript::JavaScriptParser;
pub use python::PythonParser;
pub use rust::RustParser;

use anyhow::{anyhow, bail, Result};
use std::path::Path;
use std::sync::Arc;
use tree_sitter::{Language, Node, Parser as TreeParser, Tree};

use crate::index::{LexicalContext, Parser};

/// Argument texts longer than this are cut
pub const MAX_ARG_CHARS: usize = 100;
/// Only the first arguments of a call are kept
pub const MAX_ARGS: usize = 8;
/// Variable value snippets are cut to this length
pub const MAX_VALUE_CHARS: usize = 100;

/// Owns the language leaves and maps file extensions to them
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn Parser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in language
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JavaScriptParser::new()));
        registry.register(Arc::new(PythonParser::new()));
        registry.register(Arc::new(RustParser::new()));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn Parser>) {
        self.parsers.push(parser);
    }

    pub fn parsers(&self) -> &[Arc<dyn Parser>] {
        &self.parsers
    }

    pub fn parser_for(&self, path: &Path) -> Option<Arc<dyn Parser>> {
        self.parsers.iter().find(|p| p.can_parse(path)).cloned()
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.parsers.iter().any(|p| p.can_parse(path))
    }

    pub fn extensions(&self) -> Vec<&'static str> {
        self.parsers
            .iter()
            .flat_map(|p| p.extensions().iter().copied())
            .collect()
    }
}

/// Parse `source` once, rejecting trees with syntax errors
pub(crate) fn parse_tree(language: &Language, source: &str, path: &Path) -> Result<Tree> {
    let mut parser = TreeParser::new();
    parser.set_language(language)?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| anyhow!("Failed to parse {}", path.display()))?;

    if tree.root_node().has_error() {
        bail!("Syntax errors in {}", path.display());
    }

    Ok(tree)
}

pub(crate) fn node_text<'s>(node: Node, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or("")
}

pub(crate) fn field_text(node: Node, field: &str, source: &str) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| node_text(n, source).to_string())
}

/// 1-based line a node starts on
pub(crate) fn start_line(node: Node) -> u32 {
    node.start_position().row as u32 + 1
}

pub(crate) fn end_line(node: Node) -> u32 {
    node.end_position().row as u32 + 1
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

pub(crate) fn strip_quotes(text: &str) -> String {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string()
}

/// Whether an unnamed keyword child such as `async` or `static` is present
pub(crate) fn has_keyword(node: Node, keyword: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|c| !c.is_named() && c.kind() == keyword);
    found
}

/// Depth-first pre-order walk over a subtree
pub(crate) fn walk_tree<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>)) {
    let mut cursor = root.walk();
    loop {
        visit(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// Node kinds that add a path through a function body
pub(crate) struct ComplexityRules {
    pub branches: &'static [&'static str],
    /// Binary nodes whose `operator` field may short-circuit
    pub logical: &'static [&'static str],
}

const SHORT_CIRCUIT: &[&str] = &["&&", "||", "??", "and", "or"];

pub(crate) fn cyclomatic_complexity(body: Node, source: &str, rules: &ComplexityRules) -> u32 {
    let mut complexity = 1;
    walk_tree(body, |node| {
        let kind = node.kind();
        if rules.branches.contains(&kind) {
            complexity += 1;
        } else if rules.logical.contains(&kind) {
            let short_circuits = node
                .child_by_field_name("operator")
                .map(|op| SHORT_CIRCUIT.contains(&node_text(op, source)))
                .unwrap_or(false);
            if short_circuits {
                complexity += 1;
            }
        }
    });
    complexity
}

/// Node kinds that open a function or class scope
pub(crate) struct ScopeKinds {
    pub functions: &'static [&'static str],
    pub classes: &'static [&'static str],
}

/// Nearest enclosing named function and class, found by walking ancestors
pub(crate) fn lexical_context(
    node: Node,
    source: &str,
    scopes: &ScopeKinds,
    name_of: impl Fn(Node, &str) -> Option<String>,
) -> LexicalContext {
    let mut context = LexicalContext::default();
    let mut current = node.parent();
    while let Some(ancestor) = current {
        let kind = ancestor.kind();
        if context.function.is_none() && context.class.is_none() && scopes.functions.contains(&kind) {
            context.function = name_of(ancestor, source);
        } else if context.class.is_none() && scopes.classes.contains(&kind) {
            context.class = name_of(ancestor, source);
        }
        if context.class.is_some() {
            break;
        }
        current = ancestor.parent();
    }
    context
}

/// Comment block directly above `node`. Consecutive line comments are
/// joined; kinds in `skip` (attributes, decorators) may sit in between.
pub(crate) fn preceding_comment(
    node: Node,
    source: &str,
    comment_kinds: &[&str],
    skip: &[&str],
) -> Option<String> {
    let mut lines = Vec::new();
    let mut expected_row = node.start_position().row;
    let mut current = node.prev_sibling();

    while let Some(prev) = current {
        if prev.end_position().row + 1 < expected_row {
            break;
        }
        if skip.contains(&prev.kind()) {
            expected_row = prev.start_position().row;
        } else if comment_kinds.contains(&prev.kind()) {
            lines.push(clean_comment(node_text(prev, source)));
            expected_row = prev.start_position().row;
        } else {
            break;
        }
        current = prev.prev_sibling();
    }

    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    let doc = lines.join("\n").trim().to_string();
    (!doc.is_empty()).then_some(doc)
}

fn clean_comment(text: &str) -> String {
    text.lines()
        .map(|line| {
            let line = line.trim();
            let line = line.strip_suffix("*/").unwrap_or(line);
            let line = ["///", "//!", "//", "/**", "/*", "#", "*"]
                .iter()
                .find_map(|p| line.strip_prefix(p))
                .unwrap_or(line);
            line.trim().to_string()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Argument texts of a call, cut to size
pub(crate) fn call_arguments(arguments: Option<Node>, source: &str) -> Vec<String> {
    let Some(arguments) = arguments else {
        return Vec::new();
    };
    let mut cursor = arguments.walk();
    let args = arguments
        .named_children(&mut cursor)
        .filter(|n| !n.kind().contains("comment"))
        .take(MAX_ARGS)
        .map(|n| truncate_chars(node_text(n, source), MAX_ARG_CHARS))
        .collect();
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_routes_by_extension() {
        let registry = ParserRegistry::with_defaults();
        assert_eq!(
            registry.parser_for(Path::new("src/app.js")).map(|p| p.language()),
            Some("javascript")
        );
        assert_eq!(
            registry.parser_for(Path::new("tool.py")).map(|p| p.language()),
            Some("python")
        );
        assert_eq!(
            registry.parser_for(Path::new("lib.rs")).map(|p| p.language()),
            Some("rust")
        );
        assert!(registry.parser_for(Path::new("README.md")).is_none());
        assert!(registry.extensions().contains(&"mjs"));
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_clean_comment() {
        assert_eq!(clean_comment("/// Adds two numbers"), "Adds two numbers");
        assert_eq!(
            clean_comment("/**\n * First line\n * Second line\n */"),
            "First line\nSecond line"
        );
        assert_eq!(clean_comment("# note"), "note");
    }
}
