// Python parser using tree-sitter

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

const SCOPES: ScopeKinds = ScopeKinds {
    functions: &["function_definition"],
    classes: &["class_definition"],
};

const COMPLEXITY: ComplexityRules = ComplexityRules {
    branches: &[
        "if_statement",
        "elif_clause",
        "for_statement",
        "while_statement",
        "except_clause",
        "conditional_expression",
        "case_clause",
    ],
    logical: &["boolean_operator"],
};

const COMMENTS: &[&str] = &["comment"];

/// Python parser using tree-sitter
pub struct PythonParser;

impl PythonParser {
    pub fn new() -> Self {
        Self
    }

    fn extract_function(&self, node: Node, source: &str, is_dependency: bool) -> Option<ParsedFunction> {
        let name = field_text(node, "name", source)?;
        let context = lexical_context(node, source, &SCOPES, scope_name);
        let decorators = decorators_of(node, source);

        let params = node
            .child_by_field_name("parameters")
            .map(|p| parameter_names(p, source))
            .unwrap_or_default();

        let kind = if name == "__init__" {
            Some(FunctionKind::Constructor)
        } else if decorators.iter().any(|d| d == "staticmethod" || d == "classmethod") {
            Some(FunctionKind::Static)
        } else if decorators.iter().any(|d| d.ends_with(".setter")) {
            Some(FunctionKind::Setter)
        } else if decorators.iter().any(|d| d == "property" || d.ends_with("cached_property")) {
            Some(FunctionKind::Getter)
        } else {
            None
        };

        let body = node.child_by_field_name("body");
        let complexity = body
            .map(|b| cyclomatic_complexity(b, source, &COMPLEXITY))
            .unwrap_or(1);
        let doc = body
            .and_then(|b| docstring(b, source))
            .or_else(|| preceding_comment(doc_anchor(node), source, COMMENTS, &[]));

        Some(ParsedFunction {
            name,
            start_line: start_line(node),
            end_line: end_line(node),
            params,
            source: (!is_dependency).then(|| node_text(doc_anchor(node), source).to_string()),
            doc,
            complexity,
            context,
            kind,
            is_async: has_keyword(node, "async"),
            decorators,
        })
    }

    fn extract_class(&self, node: Node, source: &str, is_dependency: bool) -> Option<ParsedClass> {
        let name = field_text(node, "name", source)?;

        let mut bases = Vec::new();
        let mut metaclass = None;
        if let Some(superclasses) = node.child_by_field_name("superclasses") {
            let mut cursor = superclasses.walk();
            for arg in superclasses.named_children(&mut cursor) {
                match arg.kind() {
                    "identifier" | "attribute" => bases.push(node_text(arg, source).to_string()),
                    "keyword_argument" => {
                        if field_text(arg, "name", source).as_deref() == Some("metaclass") {
                            metaclass = field_text(arg, "value", source);
                        }
                    }
                    _ => {}
                }
            }
        }

        let last_segment = |b: &String| b.rsplit('.').next().unwrap_or(b).to_string();
        let is_abstract = bases.iter().any(|b| last_segment(b) == "ABC")
            || metaclass.as_deref().map(|m| m.ends_with("ABCMeta")).unwrap_or(false);
        let is_interface = bases.iter().any(|b| last_segment(b) == "Protocol");

        let body = node.child_by_field_name("body");
        let doc = body
            .and_then(|b| docstring(b, source))
            .or_else(|| preceding_comment(doc_anchor(node), source, COMMENTS, &[]));

        Some(ParsedClass {
            name,
            start_line: start_line(node),
            end_line: end_line(node),
            bases,
            interfaces: Vec::new(),
            is_abstract,
            is_interface,
            source: (!is_dependency).then(|| node_text(doc_anchor(node), source).to_string()),
            doc,
        })
    }

    fn extract_imports(&self, node: Node, source: &str) -> Vec<ParsedImport> {
        let line = start_line(node);
        let mut imports = Vec::new();
        let mut cursor = node.walk();

        if node.kind() == "import_statement" {
            // import os.path, numpy as np
            for name in node.children_by_field_name("name", &mut cursor) {
                let (module, alias) = dotted_or_aliased(name, source);
                imports.push(ParsedImport {
                    name: module.clone(),
                    source: module,
                    alias,
                    is_default: false,
                    is_namespace: true,
                    line,
                });
            }
            return imports;
        }

        // from package.module import a, b as c
        let Some(module) = field_text(node, "module_name", source) else {
            return imports;
        };
        for name in node.children_by_field_name("name", &mut cursor) {
            let (name, alias) = dotted_or_aliased(name, source);
            imports.push(ParsedImport {
                name,
                source: module.clone(),
                alias,
                is_default: false,
                is_namespace: false,
                line,
            });
        }

        let mut wildcard_cursor = node.walk();
        let wildcard = node
            .named_children(&mut wildcard_cursor)
            .any(|c| c.kind() == "wildcard_import");
        if wildcard {
            imports.push(ParsedImport {
                name: module.clone(),
                source: module,
                alias: None,
                is_default: false,
                is_namespace: true,
                line,
            });
        }
        imports
    }

    fn extract_call(&self, node: Node, source: &str) -> Option<ParsedCall> {
        let function = node.child_by_field_name("function")?;
        let context = lexical_context(node, source, &SCOPES, scope_name);

        let (name, full_name, receiver_type) = match function.kind() {
            "identifier" => (node_text(function, source).to_string(), None, None),
            "attribute" => {
                let object = function.child_by_field_name("object")?;
                let receiver = match node_text(object, source) {
                    "self" | "cls" => context.class.clone(),
                    _ => None,
                };
                (
                    field_text(function, "attribute", source)?,
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

    fn extract_variable(&self, assignment: Node, source: &str) -> Option<ParsedVariable> {
        let left = assignment.child_by_field_name("left")?;
        if left.kind() != "identifier" {
            return None;
        }
        // Only plain statements, not chained or nested assignments
        if assignment.parent().map(|p| p.kind()) != Some("expression_statement") {
            return None;
        }

        Some(ParsedVariable {
            name: node_text(left, source).to_string(),
            line: start_line(assignment),
            value: assignment
                .child_by_field_name("right")
                .map(|v| truncate_chars(node_text(v, source), MAX_VALUE_CHARS)),
            kind: field_text(assignment, "type", source),
            context: lexical_context(assignment, source, &SCOPES, scope_name),
        })
    }
}

impl Default for PythonParser {
    fn default() -> Self {
        Self::new()
    }
}

fn scope_name(node: Node, source: &str) -> Option<String> {
    field_text(node, "name", source)
}

/// Decorated definitions carry their comments and source on the wrapper
fn doc_anchor(node: Node) -> Node {
    match node.parent() {
        Some(parent) if parent.kind() == "decorated_definition" => parent,
        _ => node,
    }
}

fn decorators_of(node: Node, source: &str) -> Vec<String> {
    let Some(parent) = node.parent().filter(|p| p.kind() == "decorated_definition") else {
        return Vec::new();
    };
    let mut cursor = parent.walk();
    let decorators = parent
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "decorator")
        .map(|c| {
            let text = node_text(c, source).trim_start_matches('@').trim();
            // Drop call arguments: `@retry(times=3)` -> `retry`
            text.split('(').next().unwrap_or(text).trim().to_string()
        })
        .collect();
    decorators
}

/// First statement of a block when it is a bare string
fn docstring(body: Node, source: &str) -> Option<String> {
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0).filter(|n| n.kind() == "string")?;
    let text = strip_quotes(node_text(string, source));
    let doc = text
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();
    (!doc.is_empty()).then_some(doc)
}

fn dotted_or_aliased(node: Node, source: &str) -> (String, Option<String>) {
    if node.kind() == "aliased_import" {
        let name = field_text(node, "name", source).unwrap_or_default();
        (name, field_text(node, "alias", source))
    } else {
        (node_text(node, source).to_string(), None)
    }
}

fn parameter_names(params: Node, source: &str) -> Vec<String> {
    let mut cursor = params.walk();
    let names: Vec<String> = params
        .named_children(&mut cursor)
        .filter_map(|param| match param.kind() {
            "identifier" => Some(node_text(param, source).to_string()),
            "default_parameter" | "typed_default_parameter" => field_text(param, "name", source),
            "typed_parameter" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                let mut inner = param.walk();
                let ident = param
                    .named_children(&mut inner)
                    .find(|c| c.kind() == "identifier")
                    .map(|c| node_text(c, source).to_string());
                ident
            }
            _ => None,
        })
        .filter(|name| name != "self" && name != "cls")
        .collect();
    names
}

impl Parser for PythonParser {
    fn language(&self) -> &'static str {
        "python"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py", "pyi"]
    }

    fn parse(&self, source: &str, path: &Path, repo_path: &Path, is_dependency: bool) -> Result<ParsedFile> {
        let tree = parse_tree(&tree_sitter_python::LANGUAGE.into(), source, path)?;

        let mut parsed = ParsedFile::new(path, repo_path, self.language());
        if !is_dependency {
            parsed.source = Some(source.to_string());
        }

        walk_tree(tree.root_node(), |node| match node.kind() {
            "function_definition" => {
                if let Some(function) = self.extract_function(node, source, is_dependency) {
                    parsed.functions.push(function);
                }
            }
            "class_definition" => {
                if let Some(class) = self.extract_class(node, source, is_dependency) {
                    parsed.classes.push(class);
                }
            }
            "import_statement" | "import_from_statement" => {
                parsed.imports.extend(self.extract_imports(node, source));
            }
            "call" => {
                if let Some(call) = self.extract_call(node, source) {
                    parsed.calls.push(call);
                }
            }
            "assignment" if !is_dependency => {
                if let Some(variable) = self.extract_variable(node, source) {
                    parsed.variables.push(variable);
                }
            }
            _ => {}
        });

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
import os.path
import numpy as np
from collections import OrderedDict, defaultdict as dd
from abc import ABC

MAX_SIZE: int = 100

# Computes an area
async def area(shape, precise: bool = False):
    if shape and precise:
        return 1 if shape.name else 2
    elif shape is None:
        return 0
    for _ in range(3):
        pass
    try:
        compute(shape, precise)
    except ValueError:
        return -1


class Shape(ABC):
    """Base shape."""

    def __init__(self, name, *args, scale=1.0, **kwargs):
        self.name = name

    @property
    def label(self):
        return self.describe()

    @staticmethod
    def create(kind):
        return Shape(kind)

"#;

    fn parse() -> ParsedFile {
        PythonParser::new()
            .parse(SOURCE, Path::new("/repo/shapes.py"), Path::new("/repo"), false)
            .unwrap()
    }

    #[test]
    fn test_classes() {
        let parsed = parse();
        let shape = &parsed.classes[0];
        assert_eq!(shape.name, "Shape");
        assert_eq!(shape.bases, vec!["ABC"]);
        assert!(shape.is_abstract);
        assert_eq!(shape.doc.as_deref(), Some("Base shape."));
    }

    #[test]
    fn test_functions() {
        let parsed = parse();

        let init = parsed.local_function("__init__").unwrap();
        assert_eq!(init.kind, Some(FunctionKind::Constructor));
        assert_eq!(init.params, vec!["name", "args", "scale", "kwargs"]);
        assert_eq!(init.context.class.as_deref(), Some("Shape"));

        let label = parsed.local_function("label").unwrap();
        assert_eq!(label.kind, Some(FunctionKind::Getter));
        assert_eq!(label.decorators, vec!["property"]);

        let create = parsed.local_function("create").unwrap();
        assert_eq!(create.kind, Some(FunctionKind::Static));

        let area = parsed.local_function("area").unwrap();
        assert!(area.is_async);
        assert_eq!(area.params, vec!["shape", "precise"]);
        assert_eq!(area.doc.as_deref(), Some("Computes an area"));
        // if, and, conditional, elif, for, except
        assert_eq!(area.complexity, 7);
    }

    #[test]
    fn test_imports() {
        let parsed = parse();
        let find = |name: &str| parsed.imports.iter().find(|i| i.name == name).unwrap();

        assert_eq!(find("os.path").source, "os.path");
        assert_eq!(find("numpy").alias.as_deref(), Some("np"));
        assert_eq!(find("OrderedDict").source, "collections");
        assert_eq!(find("defaultdict").alias.as_deref(), Some("dd"));
        assert_eq!(find("ABC").source, "abc");
    }

    #[test]
    fn test_calls_and_variables() {
        let parsed = parse();

        let describe = parsed.calls.iter().find(|c| c.name == "describe").unwrap();
        assert_eq!(describe.receiver_type.as_deref(), Some("Shape"));
        assert_eq!(describe.caller.as_deref(), Some("label"));

        let compute = parsed.calls.iter().find(|c| c.name == "compute").unwrap();
        assert_eq!(compute.args, vec!["shape", "precise"]);
        assert_eq!(compute.caller.as_deref(), Some("area"));

        let max = parsed.variables.iter().find(|v| v.name == "MAX_SIZE").unwrap();
        assert_eq!(max.kind.as_deref(), Some("int"));
        assert_eq!(max.value.as_deref(), Some("100"));
        assert!(max.context.function.is_none());
    }

    #[test]
    fn test_syntax_error_is_rejected() {
        let result = PythonParser::new().parse(
            "def broken(:\n",
            Path::new("/repo/broken.py"),
            Path::new("/repo"),
            false,
        );
        assert!(result.is_err());
    }
}
