// Name-based symbol resolution against the pre-scan index

use crate::index::{DefinitionKind, ImportsMap, ParsedFile, SymbolLocation};

/// Resolve a referenced name to a definition site.
///
/// Order: a name the file imports (by imported name or alias) is looked up
/// under its original name, anything else under itself. Among several
/// candidates a definition in another file wins, since same-file references
/// are matched against local declarations by the caller. Heuristic and not
/// scope-aware.
pub fn resolve<'m>(name: &str, file: &ParsedFile, imports: &'m ImportsMap) -> Option<&'m SymbolLocation> {
    resolve_where(name, file, imports, |_| true)
}

/// Same as [`resolve`], restricted to candidates `accept` allows
pub fn resolve_where<'m>(
    name: &str,
    file: &ParsedFile,
    imports: &'m ImportsMap,
    accept: impl Fn(&SymbolLocation) -> bool,
) -> Option<&'m SymbolLocation> {
    let lookup = imported_name(name, file);
    let mut candidates = imports.get(lookup).iter().filter(|l| accept(l));
    let first = candidates.next()?;
    if first.path != file.path {
        return Some(first);
    }
    candidates.find(|l| l.path != file.path).or(Some(first))
}

/// Name a reference is looked up under: the original name when the file
/// imports it under an alias, the name itself otherwise
pub fn imported_name<'a>(name: &'a str, file: &'a ParsedFile) -> &'a str {
    file.imports
        .iter()
        .find(|i| i.name == name || i.alias.as_deref() == Some(name))
        .map(|i| i.name.as_str())
        .unwrap_or(name)
}

/// Callable targets: functions, and classes for constructor calls
pub fn is_callable(location: &SymbolLocation) -> bool {
    matches!(location.kind, DefinitionKind::Function | DefinitionKind::Class)
}

pub fn is_class(location: &SymbolLocation) -> bool {
    location.kind == DefinitionKind::Class
}
