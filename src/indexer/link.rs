// Relationship linking: inheritance and call edges across files

use serde_json::Value;
use tracing::debug;

use super::resolver::{imported_name, is_callable, is_class, resolve_where};
use crate::index::graph::{NodeKey, NodeLabel, Props, RelType, WriteBatch};
use crate::index::{DefinitionKind, ImportsMap, ParsedFile};

fn label_of(kind: DefinitionKind) -> NodeLabel {
    match kind {
        DefinitionKind::Function => NodeLabel::Function,
        DefinitionKind::Class => NodeLabel::Class,
        DefinitionKind::Variable => NodeLabel::Variable,
    }
}

/// Last segment of a qualified type name: `models.Base` and `crate::a::Base`
/// both become `Base`. Generic arguments are dropped.
pub fn base_name(name: &str) -> &str {
    let name = name.split('<').next().unwrap_or(name).trim();
    let name = name.rsplit("::").next().unwrap_or(name);
    name.rsplit('.').next().unwrap_or(name)
}

/// INHERITS and IMPLEMENTS edges for every class the file declares whose
/// bases resolve to a known class
pub fn inheritance_batch(parsed: &ParsedFile, imports: &ImportsMap) -> WriteBatch {
    let path = parsed.path_str();
    let mut batch = WriteBatch::new();

    for class in &parsed.classes {
        let from = NodeKey::symbol(NodeLabel::Class, &class.name, &path, class.start_line);
        let parents = class
            .bases
            .iter()
            .map(|b| (b, RelType::Inherits))
            .chain(class.interfaces.iter().map(|i| (i, RelType::Implements)));

        for (parent, rel) in parents {
            let short = base_name(parent);
            let Some(location) = resolve_where(short, parsed, imports, is_class) else {
                debug!("Unresolved base {} of {} in {}", parent, class.name, path);
                continue;
            };
            let name = imported_name(short, parsed);
            let to = NodeKey::symbol(
                NodeLabel::Class,
                name,
                &location.path.to_string_lossy(),
                location.line,
            );
            if to == from {
                continue;
            }
            batch.merge_relationship(from.clone(), to, rel, Props::new());
        }
    }

    batch
}

/// CALLS edges for every call the file records. The callee resolves through
/// the imports map first and a function declared in the same file second;
/// unresolved calls produce nothing.
pub fn calls_batch(parsed: &ParsedFile, imports: &ImportsMap) -> WriteBatch {
    let path = parsed.path_str();
    let mut batch = WriteBatch::new();

    for call in &parsed.calls {
        let from = match parsed.caller_of(call) {
            Some(caller) => NodeKey::symbol(NodeLabel::Function, &caller.name, &path, caller.start_line),
            None => NodeKey::file(&path),
        };

        let to = if let Some(location) = resolve_where(&call.name, parsed, imports, is_callable) {
            NodeKey::symbol(
                label_of(location.kind),
                imported_name(&call.name, parsed),
                &location.path.to_string_lossy(),
                location.line,
            )
        } else if let Some(local) = parsed.local_function(&call.name) {
            NodeKey::symbol(NodeLabel::Function, &local.name, &path, local.start_line)
        } else {
            debug!("Unresolved call {} at {}:{}", call.name, path, call.line);
            continue;
        };

        let mut props = Props::new();
        props.insert("line".into(), Value::from(call.line));
        batch.merge_relationship(from, to, RelType::Calls, props);
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::graph::GraphOp;
    use crate::index::{definitions_of, Parser};
    use crate::indexer::parser::{JavaScriptParser, PythonParser};
    use std::path::Path;

    fn parse_js(path: &str, source: &str) -> ParsedFile {
        JavaScriptParser::new()
            .parse(source, Path::new(path), Path::new("/repo"), false)
            .unwrap()
    }

    fn edges(batch: &WriteBatch) -> Vec<(String, String, RelType, Option<u64>)> {
        batch
            .ops()
            .iter()
            .filter_map(|op| match op {
                GraphOp::MergeRelationship { from, to, rel, props } => Some((
                    from.name().or(from.path()).unwrap_or_default().to_string(),
                    format!("{}@{}", to.name().unwrap_or_default(), to.path().unwrap_or_default()),
                    *rel,
                    props.get("line").and_then(Value::as_u64),
                )),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("Base"), "Base");
        assert_eq!(base_name("models.Base"), "Base");
        assert_eq!(base_name("crate::shapes::Shape"), "Shape");
        assert_eq!(base_name("Repository<User>"), "Repository");
    }

    #[test]
    fn test_local_call_falls_back_to_same_file() {
        let parsed = parse_js("/repo/a.js", "function foo(){} function bar(){ foo(); }");
        let batch = calls_batch(&parsed, &ImportsMap::new());
        assert_eq!(
            edges(&batch),
            vec![("bar".to_string(), "foo@/repo/a.js".to_string(), RelType::Calls, Some(1))]
        );
    }

    #[test]
    fn test_cross_file_call_prefers_other_file() {
        let a = parse_js("/repo/a.js", "function foo(){}\nfunction bar(){\n  foo();\n}\n");
        let b = parse_js("/repo/b.js", "function foo(){}\n");
        let mut imports = definitions_of(&a);
        imports.merge(definitions_of(&b));

        let batch = calls_batch(&a, &imports);
        assert_eq!(
            edges(&batch),
            vec![("bar".to_string(), "foo@/repo/b.js".to_string(), RelType::Calls, Some(3))]
        );
    }

    #[test]
    fn test_unresolved_call_is_dropped() {
        let parsed = parse_js("/repo/a.js", "function bar(){ missing(); }");
        assert!(calls_batch(&parsed, &ImportsMap::new()).is_empty());
    }

    #[test]
    fn test_top_level_call_links_from_file() {
        let parsed = parse_js("/repo/a.js", "function main(){}\nmain();\n");
        let found = edges(&calls_batch(&parsed, &ImportsMap::new()));
        assert_eq!(found[0].0, "/repo/a.js");
        assert_eq!(found[0].1, "main@/repo/a.js");
    }

    #[test]
    fn test_inheritance_across_files() {
        let source = "from shapes import Shape\n\nclass Circle(Shape):\n    pass\n";
        let circle = PythonParser::new()
            .parse(source, Path::new("/repo/circle.py"), Path::new("/repo"), false)
            .unwrap();
        let shapes = PythonParser::new()
            .parse("class Shape:\n    pass\n", Path::new("/repo/shapes.py"), Path::new("/repo"), false)
            .unwrap();
        let imports = definitions_of(&shapes);

        let batch = inheritance_batch(&circle, &imports);
        assert_eq!(
            edges(&batch),
            vec![(
                "Circle".to_string(),
                "Shape@/repo/shapes.py".to_string(),
                RelType::Inherits,
                None
            )]
        );
    }

    #[test]
    fn test_unknown_base_is_skipped() {
        let parsed = parse_js("/repo/a.js", "class Child extends Missing {}");
        assert!(inheritance_batch(&parsed, &ImportsMap::new()).is_empty());
    }
}
