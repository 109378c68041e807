// JavaScript parser using tree-sitter

use anyhow::Result;
use std::path::Path;
use tree_sitter::Node;

use super::{
    call_arguments, cyclomatic_complexity, end_line, field_text, has_keyword, lexical_context,
    node_text, parse_tree, preceding_comment, start_line, strip_quotes, truncate_chars, walk_tree,
    ComplexityRules, ScopeKinds, MAX_ARG_CHARS, MAX_VALUE_CHARS,
};
use crate::index::{
    FunctionKind, ParsedCall, ParsedClass, ParsedFile, ParsedFunction, ParsedImport,
    ParsedVariable, Parser,
};

const FUNCTION_KINDS: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "function_expression",
    "generator_function",
    "arrow_function",
    "method_definition",
];

const CLASS_KINDS: &[&str] = &["class_declaration", "class"];

const SCOPES: ScopeKinds = ScopeKinds {
    functions: FUNCTION_KINDS,
    classes: CLASS_KINDS,
};

const COMPLEXITY: ComplexityRules = ComplexityRules {
    branches: &[
        "if_statement",
        "for_statement",
        "for_in_statement",
        "while_statement",
        "do_statement",
        "switch_case",
        "catch_clause",
        "ternary_expression",
    ],
    logical: &["binary_expression"],
};

const COMMENTS: &[&str] = &["comment"];

pub struct JavaScriptParser;

impl JavaScriptParser {
    pub fn new() -> Self {
        Self
    }

    fn extract_function(&self, node: Node, source: &str, is_dependency: bool) -> Option<ParsedFunction> {
        let name = scope_name(node, source)?;

        let params = match node.child_by_field_name("parameters") {
            Some(params) => parameter_names(params, source),
            // Arrow functions with a single bare parameter
            None => field_text(node, "parameter", source).into_iter().collect(),
        };

        let complexity = node
            .child_by_field_name("body")
            .map(|body| cyclomatic_complexity(body, source, &COMPLEXITY))
            .unwrap_or(1);

        let kind = if node.kind() == "method_definition" {
            if name == "constructor" {
                Some(FunctionKind::Constructor)
            } else if has_keyword(node, "get") {
                Some(FunctionKind::Getter)
            } else if has_keyword(node, "set") {
                Some(FunctionKind::Setter)
            } else if has_keyword(node, "static") {
                Some(FunctionKind::Static)
            } else {
                None
            }
        } else {
            None
        };

        let mut cursor = node.walk();
        let decorators = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "decorator")
            .map(|c| node_text(c, source).trim_start_matches('@').to_string())
            .collect();

        let anchor = doc_anchor(node);

        Some(ParsedFunction {
            name,
            start_line: start_line(node),
            end_line: end_line(node),
            params,
            source: (!is_dependency).then(|| node_text(node, source).to_string()),
            doc: preceding_comment(anchor, source, COMMENTS, &[]),
            complexity,
            context: lexical_context(node, source, &SCOPES, scope_name),
            kind,
            is_async: has_keyword(node, "async"),
            decorators,
        })
    }

    fn extract_class(&self, node: Node, source: &str, is_dependency: bool) -> Option<ParsedClass> {
        let name = scope_name(node, source)?;

        let mut bases = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == "class_heritage" {
                let mut inner = child.walk();
                bases.extend(
                    child
                        .named_children(&mut inner)
                        .map(|base| node_text(base, source).to_string()),
                );
            }
        }

        Some(ParsedClass {
            name,
            start_line: start_line(node),
            end_line: end_line(node),
            bases,
            interfaces: Vec::new(),
            is_abstract: false,
            is_interface: false,
            source: (!is_dependency).then(|| node_text(node, source).to_string()),
            doc: preceding_comment(doc_anchor(node), source, COMMENTS, &[]),
        })
    }

    fn extract_imports(&self, node: Node, source: &str) -> Vec<ParsedImport> {
        let Some(module) = field_text(node, "source", source).map(|s| strip_quotes(&s)) else {
            return Vec::new();
        };
        let line = start_line(node);
        let import = |name: String, alias: Option<String>, is_default: bool, is_namespace: bool| ParsedImport {
            name,
            source: module.clone(),
            alias,
            is_default,
            is_namespace,
            line,
        };

        let mut imports = Vec::new();
        let mut cursor = node.walk();
        for clause in node.named_children(&mut cursor).filter(|c| c.kind() == "import_clause") {
            let mut clause_cursor = clause.walk();
            for part in clause.named_children(&mut clause_cursor) {
                match part.kind() {
                    "identifier" => imports.push(import(node_text(part, source).to_string(), None, true, false)),
                    "namespace_import" => {
                        let mut ns_cursor = part.walk();
                        let ident = part
                            .named_children(&mut ns_cursor)
                            .find(|c| c.kind() == "identifier");
                        if let Some(ident) = ident {
                            imports.push(import(node_text(ident, source).to_string(), None, false, true));
                        }
                    }
                    "named_imports" => {
                        let mut spec_cursor = part.walk();
                        for spec in part
                            .named_children(&mut spec_cursor)
                            .filter(|c| c.kind() == "import_specifier")
                        {
                            if let Some(name) = field_text(spec, "name", source) {
                                let alias = field_text(spec, "alias", source);
                                imports.push(import(name, alias, false, false));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        // Side-effect import: `import './polyfill'`
        if imports.is_empty() {
            imports.push(import(module.clone(), None, false, false));
        }
        imports
    }

    /// `const x = require('mod')` and `const { a, b } = require('mod')`
    fn extract_require(&self, declarator: Node, source: &str) -> Vec<ParsedImport> {
        let Some(value) = declarator.child_by_field_name("value") else {
            return Vec::new();
        };
        if value.kind() != "call_expression"
            || field_text(value, "function", source).as_deref() != Some("require")
        {
            return Vec::new();
        }
        let module = call_arguments(value.child_by_field_name("arguments"), source)
            .into_iter()
            .next()
            .map(|s| strip_quotes(&s));
        let (Some(module), Some(pattern)) = (module, declarator.child_by_field_name("name")) else {
            return Vec::new();
        };

        let line = start_line(declarator);
        match pattern.kind() {
            "identifier" => vec![ParsedImport {
                name: node_text(pattern, source).to_string(),
                source: module,
                alias: None,
                is_default: true,
                is_namespace: false,
                line,
            }],
            "object_pattern" => {
                let mut cursor = pattern.walk();
                let names: Vec<String> = pattern
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() == "shorthand_property_identifier_pattern")
                    .map(|c| node_text(c, source).to_string())
                    .collect();
                names
                    .into_iter()
                    .map(|name| ParsedImport {
                        name,
                        source: module.clone(),
                        alias: None,
                        is_default: false,
                        is_namespace: false,
                        line,
                    })
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    fn extract_call(&self, node: Node, source: &str) -> Option<ParsedCall> {
        let context = lexical_context(node, source, &SCOPES, scope_name);

        let (name, full_name, receiver_type, arguments) = if node.kind() == "new_expression" {
            let constructor = node.child_by_field_name("constructor")?;
            (
                node_text(constructor, source).to_string(),
                None,
                None,
                node.child_by_field_name("arguments"),
            )
        } else {
            let function = node.child_by_field_name("function")?;
            match function.kind() {
                "identifier" => (node_text(function, source).to_string(), None, None, node.child_by_field_name("arguments")),
                "member_expression" => {
                    let object = function.child_by_field_name("object")?;
                    let receiver = match object.kind() {
                        "this" => context.class.clone(),
                        _ => None,
                    };
                    (
                        field_text(function, "property", source)?,
                        Some(truncate_chars(node_text(function, source), MAX_ARG_CHARS)),
                        receiver,
                        node.child_by_field_name("arguments"),
                    )
                }
                _ => return None,
            }
        };

        if name == "require" || name.is_empty() {
            return None;
        }

        Some(ParsedCall {
            name,
            line: start_line(node),
            args: call_arguments(arguments, source),
            caller: context.function,
            full_name,
            receiver_type,
        })
    }

    fn extract_variable(&self, declarator: Node, source: &str) -> Option<ParsedVariable> {
        let name = declarator.child_by_field_name("name")?;
        if name.kind() != "identifier" {
            return None;
        }

        let value = declarator.child_by_field_name("value");
        if let Some(value) = value {
            // Functions and classes bound to a name are recorded as such
            if FUNCTION_KINDS.contains(&value.kind())
                || CLASS_KINDS.contains(&value.kind())
                || (value.kind() == "call_expression"
                    && field_text(value, "function", source).as_deref() == Some("require"))
            {
                return None;
            }
        }

        let kind = declarator.parent().and_then(|decl| {
            let mut cursor = decl.walk();
            let keyword = decl
                .children(&mut cursor)
                .find(|c| !c.is_named())
                .map(|c| c.kind().to_string());
            keyword
        });

        Some(ParsedVariable {
            name: node_text(name, source).to_string(),
            line: start_line(declarator),
            value: value.map(|v| truncate_chars(node_text(v, source), MAX_VALUE_CHARS)),
            kind,
            context: lexical_context(declarator, source, &SCOPES, scope_name),
        })
    }
}

impl Default for JavaScriptParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Name of a function or class, falling back to whatever it is bound to
fn scope_name(node: Node, source: &str) -> Option<String> {
    if let Some(name) = field_text(node, "name", source) {
        return Some(name);
    }
    let parent = node.parent()?;
    match parent.kind() {
        "variable_declarator" => field_text(parent, "name", source),
        "pair" => field_text(parent, "key", source),
        "field_definition" => field_text(parent, "property", source),
        "assignment_expression" => {
            let left = parent.child_by_field_name("left")?;
            match left.kind() {
                "member_expression" => field_text(left, "property", source),
                "identifier" => Some(node_text(left, source).to_string()),
                _ => None,
            }
        }
        _ => None,
    }
}

/// The statement a doc comment would sit above
fn doc_anchor(node: Node) -> Node {
    let mut anchor = node;
    if let Some(parent) = node.parent() {
        if parent.kind() == "variable_declarator" {
            if let Some(declaration) = parent.parent() {
                anchor = declaration;
            }
        }
    }
    match anchor.parent() {
        Some(parent) if parent.kind() == "export_statement" => parent,
        _ => anchor,
    }
}

fn parameter_names(params: Node, source: &str) -> Vec<String> {
    let mut cursor = params.walk();
    let names = params
        .named_children(&mut cursor)
        .filter_map(|param| match param.kind() {
            "identifier" => Some(node_text(param, source).to_string()),
            "assignment_pattern" => field_text(param, "left", source),
            "rest_pattern" => Some(node_text(param, source).trim_start_matches("...").to_string()),
            "object_pattern" | "array_pattern" => Some(node_text(param, source).to_string()),
            _ => None,
        })
        .collect();
    names
}

impl Parser for JavaScriptParser {
    fn language(&self) -> &'static str {
        "javascript"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["js", "jsx", "mjs", "cjs"]
    }

    fn parse(&self, source: &str, path: &Path, repo_path: &Path, is_dependency: bool) -> Result<ParsedFile> {
        let tree = parse_tree(&tree_sitter_javascript::LANGUAGE.into(), source, path)?;

        let mut parsed = ParsedFile::new(path, repo_path, self.language());
        if !is_dependency {
            parsed.source = Some(source.to_string());
        }

        walk_tree(tree.root_node(), |node| {
            if !node.is_named() {
                return;
            }
            let kind = node.kind();
            if FUNCTION_KINDS.contains(&kind) {
                if let Some(function) = self.extract_function(node, source, is_dependency) {
                    parsed.functions.push(function);
                }
            } else if CLASS_KINDS.contains(&kind) {
                if let Some(class) = self.extract_class(node, source, is_dependency) {
                    parsed.classes.push(class);
                }
            } else {
                match kind {
                    "import_statement" => parsed.imports.extend(self.extract_imports(node, source)),
                    "call_expression" | "new_expression" => {
                        if let Some(call) = self.extract_call(node, source) {
                            parsed.calls.push(call);
                        }
                    }
                    "variable_declarator" => {
                        parsed.imports.extend(self.extract_require(node, source));
                        if !is_dependency {
                            if let Some(variable) = self.extract_variable(node, source) {
                                parsed.variables.push(variable);
                            }
                        }
                    }
                    _ => {}
                }
            }
        });

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> ParsedFile {
        JavaScriptParser::new()
            .parse(source, Path::new("/repo/a.js"), Path::new("/repo"), false)
            .unwrap()
    }

    #[test]
    fn test_functions_and_call() {
        let parsed = parse("function foo(){} function bar(){ foo(); }");

        let names: Vec<&str> = parsed.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["foo", "bar"]);
        assert_eq!(parsed.calls.len(), 1);
        assert_eq!(parsed.calls[0].name, "foo");
        assert_eq!(parsed.calls[0].caller.as_deref(), Some("bar"));
        assert_eq!(parsed.calls[0].line, 1);
    }

    #[test]
    fn test_class_members() {
        let source = r#"
class Animal {}

/** A dog */
class Dog extends Animal {
  constructor(name) { this.name = name; }
  static create() { return new Dog("rex"); }
  get label() { return this.describe(); }
  async fetch(url, opts = {}) { await load(url); }
}
"#;
        let parsed = parse(source);

        let dog = parsed.classes.iter().find(|c| c.name == "Dog").unwrap();
        assert_eq!(dog.bases, vec!["Animal"]);
        assert_eq!(dog.doc.as_deref(), Some("A dog"));

        let kind_of = |name: &str| parsed.local_function(name).and_then(|f| f.kind);
        assert_eq!(kind_of("constructor"), Some(FunctionKind::Constructor));
        assert_eq!(kind_of("create"), Some(FunctionKind::Static));
        assert_eq!(kind_of("label"), Some(FunctionKind::Getter));

        let fetch = parsed.local_function("fetch").unwrap();
        assert!(fetch.is_async);
        assert_eq!(fetch.params, vec!["url", "opts"]);
        assert_eq!(fetch.context.class.as_deref(), Some("Dog"));

        let describe = parsed.calls.iter().find(|c| c.name == "describe").unwrap();
        assert_eq!(describe.receiver_type.as_deref(), Some("Dog"));
        assert_eq!(describe.full_name.as_deref(), Some("this.describe"));
        assert_eq!(describe.caller.as_deref(), Some("label"));

        let construct = parsed.calls.iter().find(|c| c.name == "Dog").unwrap();
        assert_eq!(construct.args, vec!["\"rex\""]);
    }

    #[test]
    fn test_imports() {
        let source = r#"
import React from 'react';
import { useState as state, useEffect } from "react";
import * as path from 'path';
import './polyfill';
const fs = require('fs');
const { join } = require('path');
"#;
        let parsed = parse(source);
        let find = |name: &str| parsed.imports.iter().find(|i| i.name == name).unwrap();

        assert!(find("React").is_default);
        assert_eq!(find("useState").alias.as_deref(), Some("state"));
        assert_eq!(find("useEffect").source, "react");
        assert!(find("path").is_namespace);
        assert_eq!(find("./polyfill").source, "./polyfill");
        assert_eq!(find("fs").source, "fs");
        assert_eq!(find("join").source, "path");
        // require bindings are imports, not variables
        assert!(parsed.variables.is_empty());
    }

    #[test]
    fn test_complexity() {
        let source = r#"
function check(a, b) {
  if (a && b) {
    return a > 1 ? a : b;
  }
  for (const x of [1, 2]) {}
  return 0;
}
"#;
        let parsed = parse(source);
        // if, &&, ternary, for
        assert_eq!(parsed.functions[0].complexity, 5);
    }

    #[test]
    fn test_arrow_functions_and_variables() {
        let source = r#"
// Adds numbers
export const add = (a, b, ...rest) => a + b;
const LIMIT = 10;
function run() { let count = add(1, 2); }
"#;
        let parsed = parse(source);

        let add = parsed.local_function("add").unwrap();
        assert_eq!(add.params, vec!["a", "b", "rest"]);
        assert_eq!(add.doc.as_deref(), Some("Adds numbers"));

        let limit = parsed.variables.iter().find(|v| v.name == "LIMIT").unwrap();
        assert_eq!(limit.kind.as_deref(), Some("const"));
        assert_eq!(limit.value.as_deref(), Some("10"));
        assert!(limit.context.function.is_none());

        let count = parsed.variables.iter().find(|v| v.name == "count").unwrap();
        assert_eq!(count.context.function.as_deref(), Some("run"));
    }

    #[test]
    fn test_dependency_mode_omits_source_and_variables() {
        let parsed = JavaScriptParser::new()
            .parse(
                "const x = 1; function f() { return x; }",
                Path::new("/dep/index.js"),
                Path::new("/dep"),
                true,
            )
            .unwrap();
        assert!(parsed.source.is_none());
        assert!(parsed.variables.is_empty());
        assert!(parsed.functions[0].source.is_none());
    }

    #[test]
    fn test_syntax_error_is_rejected() {
        let result = JavaScriptParser::new().parse(
            "function ( {",
            Path::new("/repo/broken.js"),
            Path::new("/repo"),
            false,
        );
        assert!(result.is_err());
    }
}
