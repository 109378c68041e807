// Graph store port: typed labels, write batches and the store trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Property bag attached to nodes and edges
pub type Props = Map<String, Value>;

/// One row returned by a read query, column name to value
pub type Row = Map<String, Value>;

/// Errors raised by graph store implementations
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("invalid property name: {0}")]
    InvalidProperty(String),

    #[error("unknown node label: {0}")]
    UnknownLabel(String),

    #[error("missing key property '{property}' for {label}")]
    MissingKey { label: NodeLabel, property: String },

    #[error("query is not read-only")]
    NotReadOnly,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Node labels the engine writes. Closed set, so labels never come from
/// external input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    Repository,
    Directory,
    File,
    Function,
    Class,
    Variable,
    Parameter,
    Module,
}

impl NodeLabel {
    pub const ALL: [NodeLabel; 8] = [
        NodeLabel::Repository,
        NodeLabel::Directory,
        NodeLabel::File,
        NodeLabel::Function,
        NodeLabel::Class,
        NodeLabel::Variable,
        NodeLabel::Parameter,
        NodeLabel::Module,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Repository => "Repository",
            NodeLabel::Directory => "Directory",
            NodeLabel::File => "File",
            NodeLabel::Function => "Function",
            NodeLabel::Class => "Class",
            NodeLabel::Variable => "Variable",
            NodeLabel::Parameter => "Parameter",
            NodeLabel::Module => "Module",
        }
    }

    pub fn from_str(s: &str) -> GraphResult<Self> {
        NodeLabel::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| GraphError::UnknownLabel(s.to_string()))
    }

    /// Properties that make up the unique key of a node with this label
    pub fn key_properties(&self) -> &'static [&'static str] {
        match self {
            NodeLabel::Repository | NodeLabel::Directory | NodeLabel::File => &["path"],
            NodeLabel::Function | NodeLabel::Class | NodeLabel::Variable => &["name", "path", "line"],
            NodeLabel::Parameter => &["name", "path", "function", "function_line"],
            NodeLabel::Module => &["name"],
        }
    }

    /// Labels whose nodes belong to a single file and go away with it
    pub fn is_file_owned(&self) -> bool {
        matches!(
            self,
            NodeLabel::File
                | NodeLabel::Function
                | NodeLabel::Class
                | NodeLabel::Variable
                | NodeLabel::Parameter
        )
    }

    /// Labels that carry descriptions and embeddings
    pub fn is_enrichable(&self) -> bool {
        matches!(
            self,
            NodeLabel::Function | NodeLabel::Class | NodeLabel::File | NodeLabel::Directory
        )
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelType {
    Contains,
    HasParameter,
    Imports,
    Inherits,
    Implements,
    Calls,
}

impl RelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelType::Contains => "CONTAINS",
            RelType::HasParameter => "HAS_PARAMETER",
            RelType::Imports => "IMPORTS",
            RelType::Inherits => "INHERITS",
            RelType::Implements => "IMPLEMENTS",
            RelType::Calls => "CALLS",
        }
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every property name the entity model writes. Filters and property
/// bags are checked against this list before they reach SQL.
pub const ALLOWED_PROPERTIES: &[&str] = &[
    "name",
    "qualified_name",
    "path",
    "line",
    "end_line",
    "function",
    "function_line",
    "repo",
    "language",
    "is_dependency",
    "source",
    "doc",
    "complexity",
    "params",
    "kind",
    "is_async",
    "decorators",
    "context_function",
    "context_class",
    "bases",
    "interfaces",
    "is_abstract",
    "is_interface",
    "value",
    "position",
    "alias",
    "is_default",
    "is_namespace",
    "names",
    "source_module",
    "indexed_at",
];

pub fn validate_property(name: &str) -> GraphResult<&str> {
    if ALLOWED_PROPERTIES.contains(&name) {
        Ok(name)
    } else {
        Err(GraphError::InvalidProperty(name.to_string()))
    }
}

pub fn validate_props(props: &Props) -> GraphResult<()> {
    for name in props.keys() {
        validate_property(name)?;
    }
    Ok(())
}

/// Label plus key properties: the identity a merge upserts on.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeKey {
    pub label: NodeLabel,
    pub props: Props,
}

impl NodeKey {
    pub fn new(label: NodeLabel, props: Props) -> GraphResult<Self> {
        validate_props(&props)?;
        for property in label.key_properties() {
            if !props.contains_key(*property) {
                return Err(GraphError::MissingKey {
                    label,
                    property: property.to_string(),
                });
            }
        }
        Ok(Self { label, props })
    }

    fn path_key(label: NodeLabel, path: &str) -> Self {
        let mut props = Props::new();
        props.insert("path".into(), Value::from(path));
        Self { label, props }
    }

    pub fn repository(path: &str) -> Self {
        Self::path_key(NodeLabel::Repository, path)
    }

    pub fn directory(path: &str) -> Self {
        Self::path_key(NodeLabel::Directory, path)
    }

    pub fn file(path: &str) -> Self {
        Self::path_key(NodeLabel::File, path)
    }

    /// Key for a function, class or variable
    pub fn symbol(label: NodeLabel, name: &str, path: &str, line: u32) -> Self {
        let mut props = Props::new();
        props.insert("name".into(), Value::from(name));
        props.insert("path".into(), Value::from(path));
        props.insert("line".into(), Value::from(line));
        Self { label, props }
    }

    /// Key for a parameter of `function` declared at `function_line`
    pub fn parameter(name: &str, path: &str, function: &str, function_line: u32) -> Self {
        let mut props = Props::new();
        props.insert("name".into(), Value::from(name));
        props.insert("path".into(), Value::from(path));
        props.insert("function".into(), Value::from(function));
        props.insert("function_line".into(), Value::from(function_line));
        Self {
            label: NodeLabel::Parameter,
            props,
        }
    }

    pub fn module(name: &str) -> Self {
        let mut props = Props::new();
        props.insert("name".into(), Value::from(name));
        Self {
            label: NodeLabel::Module,
            props,
        }
    }

    /// Canonical key text. `serde_json::Map` keeps keys sorted, so equal key
    /// sets always serialize identically.
    pub fn canonical(&self) -> String {
        Value::Object(self.props.clone()).to_string()
    }

    pub fn name(&self) -> Option<&str> {
        self.props.get("name").and_then(Value::as_str)
    }

    pub fn path(&self) -> Option<&str> {
        self.props.get("path").and_then(Value::as_str)
    }

    /// File that owns this node, if its label is file-owned
    pub fn owner_file(&self) -> Option<&str> {
        if self.label.is_file_owned() {
            self.path()
        } else {
            None
        }
    }
}

/// One mutation inside a write batch
#[derive(Debug, Clone)]
pub enum GraphOp {
    MergeNode {
        key: NodeKey,
        props: Props,
    },
    MergeRelationship {
        from: NodeKey,
        to: NodeKey,
        rel: RelType,
        props: Props,
    },
    DeleteFileSubtree {
        path: String,
    },
}

/// Mutations applied together in one transaction
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<GraphOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge_node(&mut self, key: NodeKey, props: Props) -> &mut Self {
        self.ops.push(GraphOp::MergeNode { key, props });
        self
    }

    pub fn merge_relationship(
        &mut self,
        from: NodeKey,
        to: NodeKey,
        rel: RelType,
        props: Props,
    ) -> &mut Self {
        self.ops.push(GraphOp::MergeRelationship {
            from,
            to,
            rel,
            props,
        });
        self
    }

    pub fn delete_file_subtree(&mut self, path: impl Into<String>) -> &mut Self {
        self.ops.push(GraphOp::DeleteFileSubtree { path: path.into() });
        self
    }

    pub fn ops(&self) -> &[GraphOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Reject the whole batch if any property name falls outside the
    /// allow-list.
    pub fn validate(&self) -> GraphResult<()> {
        for op in &self.ops {
            match op {
                GraphOp::MergeNode { key, props } => {
                    validate_props(&key.props)?;
                    validate_props(props)?;
                }
                GraphOp::MergeRelationship {
                    from, to, props, ..
                } => {
                    validate_props(&from.props)?;
                    validate_props(&to.props)?;
                    validate_props(props)?;
                }
                GraphOp::DeleteFileSubtree { .. } => {}
            }
        }
        Ok(())
    }
}

/// What a batch changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub nodes_merged: usize,
    pub edges_merged: usize,
    /// Relationships skipped because an endpoint did not exist
    pub edges_skipped: usize,
    pub nodes_deleted: usize,
}

/// Identity of an enrichment record: name + path for symbols, path alone
/// for files and directories.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnrichmentKey {
    pub label: NodeLabel,
    pub name: Option<String>,
    pub path: String,
}

impl EnrichmentKey {
    pub fn symbol(label: NodeLabel, name: &str, path: &str) -> Self {
        Self {
            label,
            name: Some(name.to_string()),
            path: path.to_string(),
        }
    }

    pub fn path(label: NodeLabel, path: &str) -> Self {
        Self {
            label,
            name: None,
            path: path.to_string(),
        }
    }
}

/// A node read back from the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: i64,
    pub label: NodeLabel,
    pub key: Props,
    pub props: Props,
    pub file: Option<String>,
}

impl GraphNode {
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.key
            .get(name)
            .or_else(|| self.props.get(name))
            .and_then(Value::as_str)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.key
            .get(name)
            .or_else(|| self.props.get(name))
            .and_then(Value::as_u64)
    }
}

/// A vector search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub node: GraphNode,
    pub description: Option<String>,
    pub score: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub files: usize,
    pub enriched: usize,
}

/// Operations the engine issues against the property-graph store.
///
/// Implementations must apply a [`WriteBatch`] atomically: either every op is
/// visible afterwards or none is.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create constraints and indexes. Idempotent.
    async fn ensure_schema(&self) -> GraphResult<()>;

    async fn execute_batch(&self, batch: WriteBatch) -> GraphResult<BatchSummary>;

    async fn merge_node(&self, key: NodeKey, props: Props) -> GraphResult<()> {
        let mut batch = WriteBatch::new();
        batch.merge_node(key, props);
        self.execute_batch(batch).await.map(|_| ())
    }

    /// Returns false when either endpoint is missing and nothing was written
    async fn merge_relationship(
        &self,
        from: NodeKey,
        to: NodeKey,
        rel: RelType,
        props: Props,
    ) -> GraphResult<bool> {
        let mut batch = WriteBatch::new();
        batch.merge_relationship(from, to, rel, props);
        let summary = self.execute_batch(batch).await?;
        Ok(summary.edges_merged == 1)
    }

    /// Delete a file node, everything it owns, and edges touching them.
    /// Returns the number of nodes removed.
    async fn delete_file_subtree(&self, path: &str) -> GraphResult<usize> {
        let mut batch = WriteBatch::new();
        batch.delete_file_subtree(path);
        Ok(self.execute_batch(batch).await?.nodes_deleted)
    }

    /// Delete a repository node and everything attributed to it
    async fn delete_repository_subtree(&self, path: &str) -> GraphResult<usize>;

    async fn delete_all(&self) -> GraphResult<()>;

    /// Run a read-only query with positional parameters
    async fn run_query(&self, query: &str, params: Vec<Value>) -> GraphResult<Vec<Row>>;

    async fn find_nodes(&self, label: NodeLabel, filter: Props) -> GraphResult<Vec<GraphNode>>;

    /// Files owning nodes with edges into nodes owned by `path`
    async fn incoming_edge_files(&self, path: &str) -> GraphResult<Vec<String>>;

    async fn vector_search(&self, embedding: &[f32], limit: usize) -> GraphResult<Vec<VectorHit>>;

    async fn get_content_hash(&self, key: &EnrichmentKey) -> GraphResult<Option<String>>;

    async fn set_enrichment(
        &self,
        key: &EnrichmentKey,
        embedding: &[f32],
        description: &str,
        hash: &str,
    ) -> GraphResult<()>;

    /// Drop enrichment records attributed to a path
    async fn delete_enrichment(&self, path: &str) -> GraphResult<usize>;

    async fn stats(&self) -> GraphResult<GraphStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_canonical_is_order_independent() {
        let a = NodeKey::symbol(NodeLabel::Function, "foo", "a.js", 3);
        let mut props = Props::new();
        props.insert("line".into(), Value::from(3));
        props.insert("path".into(), Value::from("a.js"));
        props.insert("name".into(), Value::from("foo"));
        let b = NodeKey::new(NodeLabel::Function, props).unwrap();
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_key_requires_label_properties() {
        let mut props = Props::new();
        props.insert("name".into(), Value::from("foo"));
        let err = NodeKey::new(NodeLabel::Function, props).unwrap_err();
        assert!(matches!(err, GraphError::MissingKey { .. }));
    }

    #[test]
    fn test_batch_rejects_unknown_property() {
        let mut props = Props::new();
        props.insert("name) DELETE FROM nodes; --".into(), Value::from(1));
        let mut batch = WriteBatch::new();
        batch.merge_node(NodeKey::file("a.js"), props);
        assert!(matches!(batch.validate(), Err(GraphError::InvalidProperty(_))));
    }

    #[test]
    fn test_owner_file_only_for_file_owned_labels() {
        assert_eq!(NodeKey::file("a.js").owner_file(), Some("a.js"));
        assert_eq!(NodeKey::directory("src").owner_file(), None);
        assert_eq!(NodeKey::module("react").owner_file(), None);
    }

    #[test]
    fn test_label_round_trip() {
        for label in NodeLabel::ALL {
            assert_eq!(NodeLabel::from_str(label.as_str()).unwrap(), label);
        }
        assert!(NodeLabel::from_str("Bogus").is_err());
    }
}
