use anyhow::{Context, Result};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row as SqlRow, TransactionBehavior};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::graph::{
    validate_property, BatchSummary, EnrichmentKey, GraphError, GraphNode, GraphOp, GraphResult,
    GraphStats, GraphStore, NodeKey, NodeLabel, Props, RelType, Row, VectorHit, WriteBatch,
};
use super::schema::init_schema;

/// Type alias for connection pool
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Property graph stored in SQLite
#[derive(Clone)]
pub struct SqliteGraphStore {
    pool: ConnectionPool,
    db_path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteGraphStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    Ok(())
}

impl SqliteGraphStore {
    /// Create or open a graph database file
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        info!("Opening graph database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let manager = SqliteConnectionManager::file(&db_path).with_init(configure_connection);

        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .context("Failed to create connection pool")?;

        Ok(Self {
            pool,
            db_path: Some(db_path),
        })
    }

    /// Private in-memory database. Uses a single pooled connection so every
    /// caller sees the same data.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(configure_connection);
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .context("Failed to create connection pool")?;
        Ok(Self {
            pool,
            db_path: None,
        })
    }

    /// Run blocking SQLite work off the async runtime
    async fn with_conn<T, F>(&self, f: F) -> GraphResult<T>
    where
        F: FnOnce(&mut Connection) -> GraphResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }
}

/// Blob encoding for embeddings: little-endian f32s
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).to_string()),
        // Embeddings are not returned through generic queries
        ValueRef::Blob(_) => Value::Null,
    }
}

fn parse_props(text: &str) -> GraphResult<Props> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Props::new()),
    }
}

const UPSERT_NODE_SQL: &str = "\
INSERT INTO nodes (label, key, name, path, line, file, repo, props)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT(label, key) DO UPDATE SET
  name = COALESCE(excluded.name, nodes.name),
  repo = COALESCE(excluded.repo, nodes.repo),
  props = json_patch(nodes.props, excluded.props),
  updated_at = CURRENT_TIMESTAMP";

const UPSERT_EDGE_SQL: &str = "\
INSERT INTO edges (from_id, to_id, type, props)
SELECT f.id, t.id, ?3, ?4 FROM nodes f, nodes t
WHERE f.label = ?5 AND f.key = ?1 AND t.label = ?6 AND t.key = ?2
ON CONFLICT(from_id, to_id, type) DO UPDATE SET
  props = json_patch(edges.props, excluded.props)";

const NODE_COLUMNS: &str = "n.id, n.label, n.key, n.props, n.file";

fn merge_node(conn: &Connection, key: &NodeKey, props: &Props) -> GraphResult<()> {
    let name = key
        .name()
        .or_else(|| props.get("name").and_then(Value::as_str));
    let line = key.props.get("line").and_then(Value::as_i64);
    let repo = if key.label == NodeLabel::Repository {
        key.path()
    } else {
        props.get("repo").and_then(Value::as_str)
    };

    conn.prepare_cached(UPSERT_NODE_SQL)?.execute(params![
        key.label.as_str(),
        key.canonical(),
        name,
        key.path(),
        line,
        key.owner_file(),
        repo,
        Value::Object(props.clone()).to_string(),
    ])?;
    Ok(())
}

fn merge_edge(conn: &Connection, from: &NodeKey, to: &NodeKey, rel: RelType, props: &Props) -> GraphResult<usize> {
    let changed = conn.prepare_cached(UPSERT_EDGE_SQL)?.execute(params![
        from.canonical(),
        to.canonical(),
        rel.as_str(),
        Value::Object(props.clone()).to_string(),
        from.label.as_str(),
        to.label.as_str(),
    ])?;
    Ok(changed)
}

fn delete_owned_by(conn: &Connection, path: &str) -> GraphResult<usize> {
    // Edges go with their endpoints through ON DELETE CASCADE
    let deleted = conn
        .prepare_cached("DELETE FROM nodes WHERE file = ?1")?
        .execute([path])?;
    Ok(deleted)
}

fn apply_op(conn: &Connection, op: &GraphOp, summary: &mut BatchSummary) -> GraphResult<()> {
    match op {
        GraphOp::MergeNode { key, props } => {
            merge_node(conn, key, props)?;
            summary.nodes_merged += 1;
        }
        GraphOp::MergeRelationship { from, to, rel, props } => {
            if merge_edge(conn, from, to, *rel, props)? > 0 {
                summary.edges_merged += 1;
            } else {
                summary.edges_skipped += 1;
            }
        }
        GraphOp::DeleteFileSubtree { path } => {
            summary.nodes_deleted += delete_owned_by(conn, path)?;
        }
    }
    Ok(())
}

type RawNode = (i64, String, String, String, Option<String>);

fn read_raw_node(row: &SqlRow) -> rusqlite::Result<RawNode> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_node(raw: RawNode) -> GraphResult<GraphNode> {
    let (id, label, key, props, file) = raw;
    Ok(GraphNode {
        id,
        label: NodeLabel::from_str(&label)?,
        key: parse_props(&key)?,
        props: parse_props(&props)?,
        file,
    })
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn ensure_schema(&self) -> GraphResult<()> {
        self.with_conn(|conn| {
            init_schema(conn)?;
            Ok(())
        })
        .await
    }

    async fn execute_batch(&self, batch: WriteBatch) -> GraphResult<BatchSummary> {
        batch.validate()?;
        if batch.is_empty() {
            return Ok(BatchSummary::default());
        }
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut summary = BatchSummary::default();
            for op in batch.ops() {
                apply_op(&tx, op, &mut summary)?;
            }
            tx.commit()?;
            debug!(
                "Batch committed: {} nodes, {} edges ({} skipped), {} deleted",
                summary.nodes_merged, summary.edges_merged, summary.edges_skipped, summary.nodes_deleted
            );
            Ok(summary)
        })
        .await
    }

    async fn delete_repository_subtree(&self, path: &str) -> GraphResult<usize> {
        let path = path.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let deleted = tx.execute(
                "DELETE FROM nodes WHERE repo = ?1 OR (label = 'Repository' AND path = ?1)",
                [&path],
            )?;
            let prefix = format!("{}/%", path.trim_end_matches('/'));
            tx.execute(
                "DELETE FROM enrichment WHERE path = ?1 OR path LIKE ?2",
                params![path, prefix],
            )?;
            // Modules are shared between repositories; drop the ones nothing
            // points at any more.
            let orphans = tx.execute(
                "DELETE FROM nodes WHERE label = 'Module'
                 AND id NOT IN (SELECT to_id FROM edges)
                 AND id NOT IN (SELECT from_id FROM edges)",
                [],
            )?;
            tx.commit()?;
            info!("Deleted repository {}: {} nodes, {} orphan modules", path, deleted, orphans);
            Ok(deleted + orphans)
        })
        .await
    }

    async fn delete_all(&self) -> GraphResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM edges", [])?;
            tx.execute("DELETE FROM nodes", [])?;
            tx.execute("DELETE FROM enrichment", [])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn run_query(&self, query: &str, params: Vec<Value>) -> GraphResult<Vec<Row>> {
        let query = query.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&query)?;
            if !stmt.readonly() {
                return Err(GraphError::NotReadOnly);
            }
            let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            let mut rows = stmt.query(params_from_iter(params.iter().map(json_to_sql)))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut map = Row::new();
                for (i, name) in names.iter().enumerate() {
                    map.insert(name.clone(), sql_to_json(row.get_ref(i)?));
                }
                out.push(map);
            }
            Ok(out)
        })
        .await
    }

    async fn find_nodes(&self, label: NodeLabel, filter: Props) -> GraphResult<Vec<GraphNode>> {
        let mut sql = format!("SELECT {} FROM nodes n WHERE n.label = ?1", NODE_COLUMNS);
        let mut values = vec![SqlValue::Text(label.as_str().to_string())];
        for (name, value) in &filter {
            let name = validate_property(name)?;
            values.push(json_to_sql(value));
            sql.push_str(&format!(
                " AND COALESCE(json_extract(n.key, '$.{name}'), json_extract(n.props, '$.{name}')) = ?{}",
                values.len()
            ));
        }
        sql.push_str(" ORDER BY n.id");

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let raw = stmt
                .query_map(params_from_iter(values.iter()), read_raw_node)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            raw.into_iter().map(into_node).collect()
        })
        .await
    }

    async fn incoming_edge_files(&self, path: &str) -> GraphResult<Vec<String>> {
        let path = path.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT DISTINCT f.file FROM edges e
                 JOIN nodes t ON t.id = e.to_id
                 JOIN nodes f ON f.id = e.from_id
                 WHERE t.file = ?1 AND f.file IS NOT NULL AND f.file != ?1
                 ORDER BY f.file",
            )?;
            let files = stmt
                .query_map([&path], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(files)
        })
        .await
    }

    async fn vector_search(&self, embedding: &[f32], limit: usize) -> GraphResult<Vec<VectorHit>> {
        let query = embedding.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {}, e.description, e.embedding FROM enrichment e
                 JOIN nodes n ON n.label = e.label AND n.path = e.path
                   AND (e.name = '' OR COALESCE(json_extract(n.props, '$.qualified_name'), n.name) = e.name)
                 WHERE e.embedding IS NOT NULL",
                NODE_COLUMNS
            ))?;
            let raw = stmt
                .query_map([], |row| {
                    Ok((
                        read_raw_node(row)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Vec<u8>>(6)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut hits = Vec::with_capacity(raw.len());
            for (node, description, blob) in raw {
                let score = cosine_similarity(&query, &blob_to_embedding(&blob));
                hits.push(VectorHit {
                    node: into_node(node)?,
                    description,
                    score,
                });
            }
            hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            hits.truncate(limit);
            Ok(hits)
        })
        .await
    }

    async fn get_content_hash(&self, key: &EnrichmentKey) -> GraphResult<Option<String>> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let hash = conn
                .prepare_cached(
                    "SELECT content_hash FROM enrichment WHERE label = ?1 AND name = ?2 AND path = ?3",
                )?
                .query_row(
                    params![key.label.as_str(), key.name.as_deref().unwrap_or(""), key.path],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(hash)
        })
        .await
    }

    async fn set_enrichment(
        &self,
        key: &EnrichmentKey,
        embedding: &[f32],
        description: &str,
        hash: &str,
    ) -> GraphResult<()> {
        let key = key.clone();
        let blob = (!embedding.is_empty()).then(|| embedding_to_blob(embedding));
        let description = description.to_string();
        let hash = hash.to_string();
        self.with_conn(move |conn| {
            conn.prepare_cached(
                "INSERT INTO enrichment (label, name, path, content_hash, description, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(label, name, path) DO UPDATE SET
                   content_hash = excluded.content_hash,
                   description = excluded.description,
                   embedding = excluded.embedding,
                   updated_at = CURRENT_TIMESTAMP",
            )?
            .execute(params![
                key.label.as_str(),
                key.name.as_deref().unwrap_or(""),
                key.path,
                hash,
                description,
                blob,
            ])?;
            Ok(())
        })
        .await
    }

    async fn delete_enrichment(&self, path: &str) -> GraphResult<usize> {
        let path = path.to_string();
        self.with_conn(move |conn| {
            let deleted = conn
                .prepare_cached("DELETE FROM enrichment WHERE path = ?1")?
                .execute([&path])?;
            Ok(deleted)
        })
        .await
    }

    async fn stats(&self) -> GraphResult<GraphStats> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> GraphResult<usize> {
                let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
                Ok(n as usize)
            };
            Ok(GraphStats {
                nodes: count("SELECT COUNT(*) FROM nodes")?,
                edges: count("SELECT COUNT(*) FROM edges")?,
                files: count("SELECT COUNT(*) FROM nodes WHERE label = 'File'")?,
                enriched: count("SELECT COUNT(*) FROM enrichment")?,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn store() -> SqliteGraphStore {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        store.ensure_schema().await.unwrap();
        store
    }

    fn props(pairs: &[(&str, Value)]) -> Props {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    async fn seed_file(store: &SqliteGraphStore, path: &str) {
        let mut batch = WriteBatch::new();
        batch
            .merge_node(NodeKey::file(path), props(&[("repo", Value::from("/repo"))]))
            .merge_node(
                NodeKey::symbol(NodeLabel::Function, "foo", path, 1),
                props(&[("repo", Value::from("/repo"))]),
            )
            .merge_node(NodeKey::module("lodash"), Props::new())
            .merge_relationship(
                NodeKey::file(path),
                NodeKey::symbol(NodeLabel::Function, "foo", path, 1),
                RelType::Contains,
                Props::new(),
            )
            .merge_relationship(NodeKey::file(path), NodeKey::module("lodash"), RelType::Imports, Props::new());
        store.execute_batch(batch).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_database_file() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("graph.db");

        let store = SqliteGraphStore::new(&db_path).unwrap();
        store.ensure_schema().await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_merge_node_is_upsert() {
        let store = store().await;
        let key = NodeKey::symbol(NodeLabel::Function, "foo", "a.js", 1);
        store
            .merge_node(key.clone(), props(&[("complexity", Value::from(1))]))
            .await
            .unwrap();
        store
            .merge_node(key, props(&[("complexity", Value::from(3))]))
            .await
            .unwrap();

        let nodes = store.find_nodes(NodeLabel::Function, Props::new()).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].get_u64("complexity"), Some(3));
        assert_eq!(nodes[0].get_str("name"), Some("foo"));
    }

    #[tokio::test]
    async fn test_relationship_requires_both_endpoints() {
        let store = store().await;
        store.merge_node(NodeKey::file("a.js"), Props::new()).await.unwrap();

        let merged = store
            .merge_relationship(
                NodeKey::file("a.js"),
                NodeKey::symbol(NodeLabel::Function, "ghost", "a.js", 9),
                RelType::Contains,
                Props::new(),
            )
            .await
            .unwrap();
        assert!(!merged);
        assert_eq!(store.stats().await.unwrap().edges, 0);
    }

    #[tokio::test]
    async fn test_delete_file_subtree_keeps_shared_modules() {
        let store = store().await;
        seed_file(&store, "a.js").await;
        seed_file(&store, "b.js").await;

        let deleted = store.delete_file_subtree("a.js").await.unwrap();
        assert_eq!(deleted, 2);

        let files = store.find_nodes(NodeLabel::File, Props::new()).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].get_str("path"), Some("b.js"));
        assert_eq!(store.find_nodes(NodeLabel::Module, Props::new()).await.unwrap().len(), 1);
        // b.js keeps its CONTAINS and IMPORTS edges
        assert_eq!(store.stats().await.unwrap().edges, 2);
    }

    #[tokio::test]
    async fn test_delete_repository_subtree() {
        let store = store().await;
        store
            .merge_node(NodeKey::repository("/repo"), Props::new())
            .await
            .unwrap();
        seed_file(&store, "/repo/a.js").await;

        store.delete_repository_subtree("/repo").await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.nodes, 0);
        assert_eq!(stats.edges, 0);
        assert!(store
            .find_nodes(NodeLabel::Repository, Props::new())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_run_query_is_read_only() {
        let store = store().await;
        seed_file(&store, "a.js").await;

        let rows = store
            .run_query(
                "SELECT name FROM nodes WHERE label = ?1",
                vec![Value::from("Function")],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], Value::from("foo"));

        let err = store.run_query("DELETE FROM nodes", vec![]).await.unwrap_err();
        assert!(matches!(err, GraphError::NotReadOnly));
    }

    #[tokio::test]
    async fn test_find_nodes_rejects_unknown_property() {
        let store = store().await;
        let filter = props(&[("1=1 OR name", Value::from("x"))]);
        let err = store.find_nodes(NodeLabel::Function, filter).await.unwrap_err();
        assert!(matches!(err, GraphError::InvalidProperty(_)));
    }

    #[tokio::test]
    async fn test_enrichment_survives_file_replace() {
        let store = store().await;
        seed_file(&store, "a.js").await;
        let key = EnrichmentKey::symbol(NodeLabel::Function, "foo", "a.js");
        store
            .set_enrichment(&key, &[1.0, 0.0], "does foo", "hash-1")
            .await
            .unwrap();

        store.delete_file_subtree("a.js").await.unwrap();
        assert_eq!(
            store.get_content_hash(&key).await.unwrap().as_deref(),
            Some("hash-1")
        );

        store.delete_enrichment("a.js").await.unwrap();
        assert_eq!(store.get_content_hash(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_vector_search_ranks_by_similarity() {
        let store = store().await;
        let mut batch = WriteBatch::new();
        batch
            .merge_node(NodeKey::symbol(NodeLabel::Function, "parse", "a.js", 1), Props::new())
            .merge_node(NodeKey::symbol(NodeLabel::Function, "render", "a.js", 9), Props::new());
        store.execute_batch(batch).await.unwrap();

        store
            .set_enrichment(
                &EnrichmentKey::symbol(NodeLabel::Function, "parse", "a.js"),
                &[1.0, 0.0, 0.0],
                "parses input",
                "h1",
            )
            .await
            .unwrap();
        store
            .set_enrichment(
                &EnrichmentKey::symbol(NodeLabel::Function, "render", "a.js"),
                &[0.0, 1.0, 0.0],
                "renders output",
                "h2",
            )
            .await
            .unwrap();

        let hits = store.vector_search(&[0.9, 0.1, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.get_str("name"), Some("parse"));
        assert_eq!(hits[0].description.as_deref(), Some("parses input"));
    }

    #[tokio::test]
    async fn test_incoming_edge_files() {
        let store = store().await;
        seed_file(&store, "a.js").await;
        seed_file(&store, "b.js").await;
        store
            .merge_relationship(
                NodeKey::file("b.js"),
                NodeKey::symbol(NodeLabel::Function, "foo", "a.js", 1),
                RelType::Calls,
                Props::new(),
            )
            .await
            .unwrap();

        assert_eq!(store.incoming_edge_files("a.js").await.unwrap(), vec!["b.js"]);
        assert!(store.incoming_edge_files("b.js").await.unwrap().is_empty());
    }

    #[test]
    fn test_embedding_blob_round_trip() {
        let v = vec![0.5f32, -1.25, 3.0];
        assert_eq!(blob_to_embedding(&embedding_to_blob(&v)), v);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&v, &[1.0]), 0.0);
    }
}
