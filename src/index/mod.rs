// Entity model, parser contract and graph storage

pub mod db;
pub mod graph;
pub mod jobs;
pub mod schema;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One parsed source file. Owned by the pipeline for the duration of a pass.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ParsedFile {
    pub path: PathBuf,
    pub repo_path: PathBuf,
    pub language: String,
    pub source: Option<String>,
    pub functions: Vec<ParsedFunction>,
    pub classes: Vec<ParsedClass>,
    pub imports: Vec<ParsedImport>,
    pub calls: Vec<ParsedCall>,
    pub variables: Vec<ParsedVariable>,
}

impl ParsedFile {
    pub fn new(path: &Path, repo_path: &Path, language: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            repo_path: repo_path.to_path_buf(),
            language: language.to_string(),
            ..Default::default()
        }
    }

    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    /// First function declared in this file with the given name.
    pub fn local_function(&self, name: &str) -> Option<&ParsedFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Resolve the function a call was made from, preferring a match on the
    /// enclosing class when several functions share the name.
    pub fn caller_of(&self, call: &ParsedCall) -> Option<&ParsedFunction> {
        let caller = call.caller.as_deref()?;
        let mut candidates = self.functions.iter().filter(|f| f.name == caller);
        let first = candidates.next()?;
        if first.start_line <= call.line && call.line <= first.end_line {
            return Some(first);
        }
        candidates
            .find(|f| f.start_line <= call.line && call.line <= f.end_line)
            .or(Some(first))
    }

    /// Per-file identities of the functions, in declaration order. Methods
    /// and nested functions are qualified by their enclosing class and
    /// function (`Shape.area`); a repeated identity gets an occurrence
    /// suffix (`render#2`). Unlike line numbers these survive edits
    /// elsewhere in the file.
    pub fn function_ids(&self) -> Vec<String> {
        unique_ids(self.functions.iter().map(|f| {
            [f.context.class.as_deref(), f.context.function.as_deref(), Some(f.name.as_str())]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(".")
        }))
    }

    /// Per-file identities of the classes, see [`ParsedFile::function_ids`]
    pub fn class_ids(&self) -> Vec<String> {
        unique_ids(self.classes.iter().map(|c| c.name.clone()))
    }
}

fn unique_ids(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    names
        .map(|name| {
            let count = seen.entry(name.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                name
            } else {
                format!("{}#{}", name, count)
            }
        })
        .collect()
}

/// Nearest enclosing function and class of a declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LexicalContext {
    pub function: Option<String>,
    pub class: Option<String>,
}

/// Function flavours that change how callers see a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    Getter,
    Setter,
    Static,
    Constructor,
}

impl FunctionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::Getter => "getter",
            FunctionKind::Setter => "setter",
            FunctionKind::Static => "static",
            FunctionKind::Constructor => "constructor",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ParsedFunction {
    pub name: String,
    pub start_line: u32,
    pub end_line: u32,
    pub params: Vec<String>,
    pub source: Option<String>,
    pub doc: Option<String>,
    /// Cyclomatic complexity, always >= 1
    pub complexity: u32,
    pub context: LexicalContext,
    pub kind: Option<FunctionKind>,
    pub is_async: bool,
    pub decorators: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ParsedClass {
    pub name: String,
    pub start_line: u32,
    pub end_line: u32,
    pub bases: Vec<String>,
    pub interfaces: Vec<String>,
    pub is_abstract: bool,
    pub is_interface: bool,
    pub source: Option<String>,
    pub doc: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ParsedImport {
    /// Imported symbol name (or module name for whole-module imports)
    pub name: String,
    /// Module path or specifier the symbol comes from
    pub source: String,
    pub alias: Option<String>,
    pub is_default: bool,
    pub is_namespace: bool,
    pub line: u32,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ParsedCall {
    pub name: String,
    pub line: u32,
    pub args: Vec<String>,
    pub caller: Option<String>,
    /// Full callee text such as `obj.method`
    pub full_name: Option<String>,
    pub receiver_type: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ParsedVariable {
    pub name: String,
    pub line: u32,
    pub value: Option<String>,
    pub kind: Option<String>,
    pub context: LexicalContext,
}

/// A source text handed to a parser's pre-scan.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
}

/// What a name resolves to in the imports map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    Function,
    Class,
    Variable,
}

/// Where a name is defined.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SymbolLocation {
    pub path: PathBuf,
    pub line: u32,
    pub kind: DefinitionKind,
}

/// Project-wide index of definition sites, keyed by bare symbol name.
///
/// Built by the pre-scan phase and read-only while files are written.
#[derive(Debug, Clone, Default)]
pub struct ImportsMap {
    entries: HashMap<String, Vec<SymbolLocation>>,
}

impl ImportsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, location: SymbolLocation) {
        let locations = self.entries.entry(name.into()).or_default();
        if !locations.contains(&location) {
            locations.push(location);
        }
    }

    /// Merge another partial map into this one. Locations append, they never
    /// overwrite existing entries.
    pub fn merge(&mut self, other: ImportsMap) {
        for (name, locations) in other.entries {
            for location in locations {
                self.insert(name.clone(), location);
            }
        }
    }

    pub fn get(&self, name: &str) -> &[SymbolLocation] {
        self.entries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Drop every location attributed to `path`.
    pub fn remove_file(&mut self, path: &Path) {
        self.entries.retain(|_, locations| {
            locations.retain(|l| l.path != path);
            !locations.is_empty()
        });
    }

    /// Record the definitions of a freshly parsed file, replacing whatever the
    /// map held for that path before.
    pub fn replace_file(&mut self, parsed: &ParsedFile) {
        self.remove_file(&parsed.path);
        self.merge(definitions_of(parsed));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Definitions a parsed file contributes to an imports map: every function
/// and class, plus variables declared outside any function.
pub fn definitions_of(parsed: &ParsedFile) -> ImportsMap {
    let mut map = ImportsMap::new();
    for function in &parsed.functions {
        map.insert(
            function.name.clone(),
            SymbolLocation {
                path: parsed.path.clone(),
                line: function.start_line,
                kind: DefinitionKind::Function,
            },
        );
    }
    for class in &parsed.classes {
        map.insert(
            class.name.clone(),
            SymbolLocation {
                path: parsed.path.clone(),
                line: class.start_line,
                kind: DefinitionKind::Class,
            },
        );
    }
    for variable in parsed.variables.iter().filter(|v| v.context.function.is_none()) {
        map.insert(
            variable.name.clone(),
            SymbolLocation {
                path: parsed.path.clone(),
                line: variable.line,
                kind: DefinitionKind::Variable,
            },
        );
    }
    map
}

/// Contract every language leaf implements.
pub trait Parser: Send + Sync {
    /// Language tag written onto file nodes
    fn language(&self) -> &'static str;

    /// File extensions (without the dot) this parser accepts
    fn extensions(&self) -> &'static [&'static str];

    fn can_parse(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions().contains(&e))
            .unwrap_or(false)
    }

    /// Parse one file in a single pass. With `is_dependency` set, captured
    /// source text and variables are omitted.
    fn parse(
        &self,
        source: &str,
        path: &Path,
        repo_path: &Path,
        is_dependency: bool,
    ) -> anyhow::Result<ParsedFile>;

    /// Build a partial imports map for a batch of this parser's files.
    /// Files that fail to parse contribute nothing.
    fn pre_scan(&self, files: &[SourceFile]) -> ImportsMap {
        let mut map = ImportsMap::new();
        for file in files {
            match self.parse(&file.text, &file.path, Path::new(""), false) {
                Ok(parsed) => map.merge(definitions_of(&parsed)),
                Err(e) => tracing::debug!("Pre-scan skipped {}: {}", file.path.display(), e),
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn loc(path: &str, line: u32) -> SymbolLocation {
        SymbolLocation {
            path: PathBuf::from(path),
            line,
            kind: DefinitionKind::Function,
        }
    }

    #[test]
    fn test_merge_appends_locations() {
        let mut a = ImportsMap::new();
        a.insert("foo", loc("a.js", 1));
        let mut b = ImportsMap::new();
        b.insert("foo", loc("b.js", 3));
        b.insert("bar", loc("b.js", 7));

        a.merge(b);
        assert_eq!(a.get("foo"), &[loc("a.js", 1), loc("b.js", 3)]);
        assert_eq!(a.get("bar"), &[loc("b.js", 7)]);
        assert!(a.get("missing").is_empty());
    }

    #[test]
    fn test_replace_file_drops_stale_definitions() {
        let mut map = ImportsMap::new();
        map.insert("old", loc("a.js", 1));
        map.insert("shared", loc("a.js", 5));
        map.insert("shared", loc("b.js", 2));

        let mut parsed = ParsedFile::new(Path::new("a.js"), Path::new("."), "javascript");
        parsed.classes.push(ParsedClass {
            name: "Fresh".to_string(),
            start_line: 10,
            end_line: 12,
            bases: vec![],
            interfaces: vec![],
            is_abstract: false,
            is_interface: false,
            source: None,
            doc: None,
        });
        map.replace_file(&parsed);

        assert!(map.get("old").is_empty());
        assert_eq!(map.get("shared"), &[loc("b.js", 2)]);
        assert_eq!(map.get("Fresh")[0].kind, DefinitionKind::Class);
    }

    fn function(name: &str, class: Option<&str>) -> ParsedFunction {
        ParsedFunction {
            name: name.to_string(),
            start_line: 1,
            end_line: 1,
            params: vec![],
            source: None,
            doc: None,
            complexity: 1,
            context: LexicalContext {
                class: class.map(String::from),
                ..Default::default()
            },
            kind: None,
            is_async: false,
            decorators: vec![],
        }
    }

    #[test]
    fn test_symbol_ids_are_unique_per_file() {
        let mut parsed = ParsedFile::new(Path::new("a.py"), Path::new("."), "python");
        parsed.functions = vec![
            function("render", Some("A")),
            function("render", Some("B")),
            function("helper", None),
            function("helper", None),
        ];
        assert_eq!(parsed.function_ids(), ["A.render", "B.render", "helper", "helper#2"]);
        assert!(parsed.class_ids().is_empty());
    }

    proptest! {
        #[test]
        fn merge_never_loses_locations(
            left in proptest::collection::vec(("[a-c]", 1u32..20), 0..20),
            right in proptest::collection::vec(("[a-c]", 1u32..20), 0..20),
        ) {
            let mut a = ImportsMap::new();
            for (name, line) in &left {
                a.insert(name.clone(), loc("left.js", *line));
            }
            let mut b = ImportsMap::new();
            for (name, line) in &right {
                b.insert(name.clone(), loc("right.js", *line));
            }
            a.merge(b);
            for (name, line) in left.iter() {
                prop_assert!(a.get(name).contains(&loc("left.js", *line)));
            }
            for (name, line) in right.iter() {
                prop_assert!(a.get(name).contains(&loc("right.js", *line)));
            }
        }
    }
}
