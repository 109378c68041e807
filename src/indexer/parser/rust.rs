// Rust parser using tree-sitter

use anyhow::Result;
use std::path::Path;
use tree_sitter::Node;

use super::{
    call_arguments, cyclomatic_complexity, end_line, field_text, lexical_context, node_text,
    parse_tree, preceding_comment, start_line, truncate_chars, walk_tree, ComplexityRules,
    ScopeKinds, MAX_ARG_CHARS, MAX_VALUE_CHARS,
};
use crate::index::{
    FunctionKind, ParsedCall, ParsedClass, ParsedFile, ParsedFunction, ParsedImport,
    ParsedVariable, Parser,
};

const FUNCTION_KINDS: &[&str] = &["function_item", "function_signature_item"];

const SCOPES: ScopeKinds = ScopeKinds {
    functions: &["function_item"],
    classes: &["impl_item", "trait_item"],
};

const COMPLEXITY: ComplexityRules = ComplexityRules {
    branches: &[
        "if_expression",
        "match_arm",
        "for_expression",
        "while_expression",
        "loop_expression",
    ],
    logical: &["binary_expression"],
};

const COMMENTS: &[&str] = &["line_comment", "block_comment"];
const ATTRIBUTES: &[&str] = &["attribute_item"];

// Rust parser using tree-sitter
pub struct RustParser;

impl RustParser {
    pub fn new() -> Self {
        Self
    }

    fn extract_function(&self, node: Node, source: &str, is_dependency: bool) -> Option<ParsedFunction> {
        let name = field_text(node, "name", source)?;
        let context = lexical_context(node, source, &SCOPES, scope_name);

        let mut params = Vec::new();
        let mut has_receiver = false;
        if let Some(parameters) = node.child_by_field_name("parameters") {
            let mut cursor = parameters.walk();
            for param in parameters.named_children(&mut cursor) {
                match param.kind() {
                    "self_parameter" => has_receiver = true,
                    "parameter" => {
                        if let Some(pattern) = field_text(param, "pattern", source) {
                            params.push(pattern.trim_start_matches("mut ").to_string());
                        }
                    }
                    _ => {}
                }
            }
        }

        // Associated functions without a receiver
        let kind = if context.class.is_some() && !has_receiver {
            if name == "new" {
                Some(FunctionKind::Constructor)
            } else {
                Some(FunctionKind::Static)
            }
        } else {
            None
        };

        let is_async = {
            let mut cursor = node.walk();
            let found = node
                .children(&mut cursor)
                .filter(|c| c.kind() == "function_modifiers")
                .any(|m| node_text(m, source).split_whitespace().any(|w| w == "async"));
            found
        };

        let complexity = node
            .child_by_field_name("body")
            .map(|body| cyclomatic_complexity(body, source, &COMPLEXITY))
            .unwrap_or(1);

        Some(ParsedFunction {
            name,
            start_line: start_line(node),
            end_line: end_line(node),
            params,
            source: (!is_dependency).then(|| node_text(node, source).to_string()),
            doc: preceding_comment(node, source, COMMENTS, ATTRIBUTES),
            complexity,
            context,
            kind,
            is_async,
            decorators: attributes_of(node, source),
        })
    }

    fn extract_type(&self, node: Node, source: &str, is_dependency: bool) -> Option<ParsedClass> {
        let name = field_text(node, "name", source)?;
        let is_interface = node.kind() == "trait_item";

        // Supertraits: `trait Shape: Debug + Clone`
        let mut bases = Vec::new();
        if let Some(bounds) = node.child_by_field_name("bounds") {
            let mut cursor = bounds.walk();
            bases.extend(
                bounds
                    .named_children(&mut cursor)
                    .filter(|b| b.kind() != "lifetime")
                    .map(|b| type_name(b, source)),
            );
        }

        Some(ParsedClass {
            name,
            start_line: start_line(node),
            end_line: end_line(node),
            bases,
            interfaces: Vec::new(),
            is_abstract: is_interface,
            is_interface,
            source: (!is_dependency).then(|| node_text(node, source).to_string()),
            doc: preceding_comment(node, source, COMMENTS, ATTRIBUTES),
        })
    }

    /// `impl Trait for Type` as a (type, trait) pair
    fn extract_impl(&self, node: Node, source: &str) -> Option<(String, String)> {
        let trait_node = node.child_by_field_name("trait")?;
        let type_node = node.child_by_field_name("type")?;
        Some((type_name(type_node, source), type_name(trait_node, source)))
    }

    fn extract_imports(&self, node: Node, source: &str) -> Vec<ParsedImport> {
        let mut imports = Vec::new();
        if let Some(argument) = node.child_by_field_name("argument") {
            collect_use(argument, "", source, start_line(node), &mut imports);
        }
        imports
    }

    fn extract_call(&self, node: Node, source: &str) -> Option<ParsedCall> {
        let context = lexical_context(node, source, &SCOPES, scope_name);
        let mut function = node.child_by_field_name("function")?;
        if function.kind() == "generic_function" {
            function = function.child_by_field_name("function")?;
        }

        let (name, full_name, receiver_type) = match function.kind() {
            "identifier" => (node_text(function, source).to_string(), None, None),
            "scoped_identifier" => {
                let path = field_text(function, "path", source);
                let receiver = match path.as_deref() {
                    Some("Self") => context.class.clone(),
                    _ => path,
                };
                (
                    field_text(function, "name", source)?,
                    Some(truncate_chars(node_text(function, source), MAX_ARG_CHARS)),
                    receiver,
                )
            }
            "field_expression" => {
                let value = function.child_by_field_name("value")?;
                let receiver = match value.kind() {
                    "self" => context.class.clone(),
                    _ => None,
                };
                (
                    field_text(function, "field", source)?,
                    Some(truncate_chars(node_text(function, source), MAX_ARG_CHARS)),
                    receiver,
                )
            }
            _ => return None,
        };

        Some(ParsedCall {
            name,
            line: start_line(node),
            args: call_arguments(node.child_by_field_name("arguments"), source),
            caller: context.function,
            full_name,
            receiver_type,
        })
    }

    fn extract_variable(&self, node: Node, source: &str) -> Option<ParsedVariable> {
        let (name, kind) = match node.kind() {
            "let_declaration" => {
                let pattern = node.child_by_field_name("pattern")?;
                if pattern.kind() != "identifier" {
                    return None;
                }
                (
                    node_text(pattern, source).to_string(),
                    field_text(node, "type", source),
                )
            }
            "const_item" => (field_text(node, "name", source)?, Some("const".to_string())),
            "static_item" => (field_text(node, "name", source)?, Some("static".to_string())),
            _ => return None,
        };

        Some(ParsedVariable {
            name,
            line: start_line(node),
            value: node
                .child_by_field_name("value")
                .map(|v| truncate_chars(node_text(v, source), MAX_VALUE_CHARS)),
            kind,
            context: lexical_context(node, source, &SCOPES, scope_name),
        })
    }
}

impl Default for RustParser {
    fn default() -> Self {
        Self::new()
    }
}

fn scope_name(node: Node, source: &str) -> Option<String> {
    match node.kind() {
        "impl_item" => node.child_by_field_name("type").map(|t| type_name(t, source)),
        _ => field_text(node, "name", source),
    }
}

/// Bare type name without generics or path: `std::fmt::Display` -> `Display`
fn type_name(node: Node, source: &str) -> String {
    match node.kind() {
        "generic_type" => node
            .child_by_field_name("type")
            .map(|t| type_name(t, source))
            .unwrap_or_else(|| node_text(node, source).to_string()),
        "scoped_type_identifier" => field_text(node, "name", source)
            .unwrap_or_else(|| node_text(node, source).to_string()),
        _ => node_text(node, source).to_string(),
    }
}

/// Attributes stacked directly above an item, innermost last
fn attributes_of(node: Node, source: &str) -> Vec<String> {
    let mut attributes = Vec::new();
    let mut current = node.prev_sibling();
    while let Some(prev) = current {
        match prev.kind() {
            "attribute_item" => {
                let text = node_text(prev, source);
                let inner = text
                    .trim_start_matches("#[")
                    .trim_end_matches(']')
                    .trim();
                attributes.push(inner.to_string());
            }
            kind if COMMENTS.contains(&kind) => {}
            _ => break,
        }
        current = prev.prev_sibling();
    }
    attributes.reverse();
    attributes
}

fn join_path(prefix: &str, path: &str) -> String {
    match (prefix.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (_, true) => prefix.to_string(),
        _ => format!("{}::{}", prefix, path),
    }
}

/// Flatten a use tree into one import per bound name
fn collect_use(node: Node, prefix: &str, source: &str, line: u32, out: &mut Vec<ParsedImport>) {
    let import = |name: String, module: String, alias: Option<String>, is_namespace: bool| ParsedImport {
        name,
        source: module,
        alias,
        is_default: false,
        is_namespace,
        line,
    };

    match node.kind() {
        "identifier" => {
            let name = node_text(node, source).to_string();
            let module = if prefix.is_empty() { name.clone() } else { prefix.to_string() };
            out.push(import(name, module, None, false));
        }
        "scoped_identifier" => {
            let path = field_text(node, "path", source).unwrap_or_default();
            if let Some(name) = field_text(node, "name", source) {
                out.push(import(name, join_path(prefix, &path), None, false));
            }
        }
        "use_as_clause" => {
            let alias = field_text(node, "alias", source);
            if let Some(path) = node.child_by_field_name("path") {
                let (module, name) = if path.kind() == "scoped_identifier" {
                    (
                        join_path(prefix, &field_text(path, "path", source).unwrap_or_default()),
                        field_text(path, "name", source).unwrap_or_default(),
                    )
                } else {
                    let name = node_text(path, source).to_string();
                    (if prefix.is_empty() { name.clone() } else { prefix.to_string() }, name)
                };
                out.push(import(name, module, alias, false));
            }
        }
        "use_list" => {
            let mut cursor = node.walk();
            let children: Vec<Node> = node.named_children(&mut cursor).collect();
            for child in children {
                collect_use(child, prefix, source, line, out);
            }
        }
        "scoped_use_list" => {
            let path = field_text(node, "path", source).unwrap_or_default();
            if let Some(list) = node.child_by_field_name("list") {
                collect_use(list, &join_path(prefix, &path), source, line, out);
            }
        }
        "use_wildcard" => {
            let module = join_path(prefix, node_text(node, source).trim_end_matches("::*"));
            out.push(import(module.clone(), module, None, true));
        }
        _ => {}
    }
}

impl Parser for RustParser {
    fn language(&self) -> &'static str {
        "rust"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn parse(&self, source: &str, path: &Path, repo_path: &Path, is_dependency: bool) -> Result<ParsedFile> {
        let tree = parse_tree(&tree_sitter_rust::LANGUAGE.into(), source, path)?;

        let mut parsed = ParsedFile::new(path, repo_path, self.language());
        if !is_dependency {
            parsed.source = Some(source.to_string());
        }

        let mut impls = Vec::new();
        walk_tree(tree.root_node(), |node| {
            let kind = node.kind();
            if FUNCTION_KINDS.contains(&kind) {
                if let Some(function) = self.extract_function(node, source, is_dependency) {
                    parsed.functions.push(function);
                }
                return;
            }
            match kind {
                "struct_item" | "enum_item" | "union_item" | "trait_item" => {
                    if let Some(class) = self.extract_type(node, source, is_dependency) {
                        parsed.classes.push(class);
                    }
                }
                "impl_item" => impls.extend(self.extract_impl(node, source)),
                "use_declaration" => parsed.imports.extend(self.extract_imports(node, source)),
                "call_expression" => {
                    if let Some(call) = self.extract_call(node, source) {
                        parsed.calls.push(call);
                    }
                }
                "let_declaration" | "const_item" | "static_item" if !is_dependency => {
                    if let Some(variable) = self.extract_variable(node, source) {
                        parsed.variables.push(variable);
                    }
                }
                _ => {}
            }
        });

        // Trait impls for types declared in this file
        for (type_name, trait_name) in impls {
            if let Some(class) = parsed.classes.iter_mut().find(|c| c.name == type_name) {
                if !class.interfaces.contains(&trait_name) {
                    class.interfaces.push(trait_name);
                }
            }
        }

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
use std::collections::HashMap;
use std::io::{self, Read, Write as W};
use crate::index::*;

const LIMIT: usize = 10;

/// A geometric shape
#[derive(Debug, Clone)]
pub struct Circle {
    radius: f64,
}

pub trait Area: std::fmt::Debug {
    fn area(&self) -> f64;
}

impl Circle {
    pub fn new(radius: f64) -> Self {
        Self { radius }
    }

    fn unit() -> Self {
        Self::new(1.0)
    }
}

impl Area for Circle {
    fn area(&self) -> f64 {
        self.scale(3.14)
    }
}

async fn classify(value: i32, mut strict: bool) -> &'static str {
    let label = match value {
        0 => "zero",
        v if v < 0 && strict => "negative",
        _ => "positive",
    };
    if strict || value > 100 {
        return "big";
    }
    label
}
"#;

    fn parse() -> ParsedFile {
        RustParser::new()
            .parse(SOURCE, Path::new("/repo/src/shape.rs"), Path::new("/repo"), false)
            .unwrap()
    }

    #[test]
    fn test_types_and_traits() {
        let parsed = parse();

        let circle = parsed.classes.iter().find(|c| c.name == "Circle").unwrap();
        assert_eq!(circle.doc.as_deref(), Some("A geometric shape"));
        assert_eq!(circle.interfaces, vec!["Area"]);

        let area = parsed.classes.iter().find(|c| c.name == "Area").unwrap();
        assert!(area.is_interface);
        assert_eq!(area.bases, vec!["Debug"]);
    }

    #[test]
    fn test_functions() {
        let parsed = parse();

        let new = parsed.local_function("new").unwrap();
        assert_eq!(new.kind, Some(FunctionKind::Constructor));
        assert_eq!(new.params, vec!["radius"]);
        assert_eq!(new.context.class.as_deref(), Some("Circle"));

        assert_eq!(parsed.local_function("unit").unwrap().kind, Some(FunctionKind::Static));

        let classify = parsed.local_function("classify").unwrap();
        assert!(classify.is_async);
        assert_eq!(classify.params, vec!["value", "strict"]);
        // three arms, &&, if, ||
        assert_eq!(classify.complexity, 7);
    }

    #[test]
    fn test_use_tree_is_flattened() {
        let parsed = parse();
        let find = |name: &str| parsed.imports.iter().find(|i| i.name == name).unwrap();

        assert_eq!(find("HashMap").source, "std::collections");
        assert_eq!(find("Read").source, "std::io");
        assert_eq!(find("Write").alias.as_deref(), Some("W"));
        assert!(find("crate::index").is_namespace);
    }

    #[test]
    fn test_calls_and_variables() {
        let parsed = parse();

        let scale = parsed.calls.iter().find(|c| c.name == "scale").unwrap();
        assert_eq!(scale.receiver_type.as_deref(), Some("Circle"));
        assert_eq!(scale.caller.as_deref(), Some("area"));

        let new_call = parsed.calls.iter().find(|c| c.name == "new").unwrap();
        assert_eq!(new_call.receiver_type.as_deref(), Some("Circle"));
        assert_eq!(new_call.caller.as_deref(), Some("unit"));

        let limit = parsed.variables.iter().find(|v| v.name == "LIMIT").unwrap();
        assert_eq!(limit.kind.as_deref(), Some("const"));
        let label = parsed.variables.iter().find(|v| v.name == "label").unwrap();
        assert_eq!(label.context.function.as_deref(), Some("classify"));
    }
}
