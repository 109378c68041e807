// Query execution engine

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::enrich::provider::EmbeddingProvider;
use crate::index::graph::{GraphStore, Row};

/// One node in a query answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub kind: String,
    pub name: String,
    pub path: String,
    pub line: Option<u64>,
    /// Query specific extra: call line, complexity, depth or score
    pub detail: Option<String>,
}

impl QueryResult {
    fn from_row(row: &Row, detail: Option<String>) -> Self {
        let text = |name: &str| row.get(name).and_then(Value::as_str).unwrap_or_default().to_string();
        Self {
            kind: text("label"),
            name: text("name"),
            path: text("path"),
            line: row.get("line").and_then(Value::as_u64),
            detail,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Hierarchy {
    pub class: String,
    pub ancestors: Vec<QueryResult>,
    pub descendants: Vec<QueryResult>,
}

const CALLERS_SQL: &str = "\
SELECT f.label, f.name, f.path, f.line, json_extract(e.props, '$.line') AS call_line
FROM edges e
JOIN nodes t ON t.id = e.to_id
JOIN nodes f ON f.id = e.from_id
WHERE e.type = 'CALLS' AND t.name = ?1 AND t.label IN ('Function', 'Class')
ORDER BY f.path, f.line";

const CALLEES_SQL: &str = "\
SELECT t.label, t.name, t.path, t.line, json_extract(e.props, '$.line') AS call_line
FROM edges e
JOIN nodes f ON f.id = e.from_id
JOIN nodes t ON t.id = e.to_id
WHERE e.type = 'CALLS' AND f.name = ?1 AND f.label IN ('Function', 'File')
ORDER BY call_line, t.name";

// Functions nothing calls. Entry points, constructors, decorated functions
// (usually registered with a framework) and dependency code are left out.
const DEAD_CODE_SQL: &str = "\
SELECT n.label, n.name, n.path, n.line
FROM nodes n
WHERE n.label = 'Function'
  AND NOT EXISTS (SELECT 1 FROM edges e WHERE e.to_id = n.id AND e.type = 'CALLS')
  AND n.name NOT IN ('main', '__init__', 'constructor', 'new')
  AND COALESCE(json_extract(n.props, '$.kind'), '') != 'constructor'
  AND COALESCE(json_array_length(n.props, '$.decorators'), 0) = 0
  AND NOT EXISTS (
    SELECT 1 FROM nodes r
    WHERE r.label = 'Repository' AND r.path = n.repo
      AND json_extract(r.props, '$.is_dependency') = 1
  )
ORDER BY n.path, n.line";

fn hierarchy_sql(forward: bool) -> String {
    let (next, join) = if forward {
        ("e.to_id", "e.from_id")
    } else {
        ("e.from_id", "e.to_id")
    };
    format!(
        "WITH RECURSIVE walk(id, depth) AS (
           SELECT id, 0 FROM nodes WHERE label = 'Class' AND name = ?1
           UNION
           SELECT {next}, walk.depth + 1 FROM edges e JOIN walk ON {join} = walk.id
           WHERE e.type IN ('INHERITS', 'IMPLEMENTS') AND walk.depth < 32
         )
         SELECT n.label, n.name, n.path, n.line, MIN(walk.depth) AS depth
         FROM walk JOIN nodes n ON n.id = walk.id
         WHERE walk.depth > 0
         GROUP BY n.id
         ORDER BY depth, n.name"
    )
}

const MOST_COMPLEX_SQL: &str = "\
SELECT n.label, n.name, n.path, n.line, json_extract(n.props, '$.complexity') AS complexity
FROM nodes n
WHERE n.label = 'Function'
ORDER BY complexity DESC, n.path, n.line
LIMIT ?1";

const NAME_SEARCH_SQL: &str = "\
SELECT n.label, n.name, n.path, n.line
FROM nodes_fts s
JOIN nodes n ON n.id = s.rowid
WHERE nodes_fts MATCH ?1 AND n.label IN ('Function', 'Class', 'Variable')
ORDER BY s.rank
LIMIT ?2";

const REPOSITORIES_SQL: &str = "\
SELECT n.label, n.name, n.path, n.line, json_extract(n.props, '$.is_dependency') AS is_dependency
FROM nodes n
WHERE n.label = 'Repository'
ORDER BY n.path";

/// Read-side questions answered from the graph store
pub struct QueryEngine {
    store: Arc<dyn GraphStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store, embedder: None }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    async fn rows(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>> {
        self.store
            .run_query(sql, params)
            .await
            .context("Query failed")
    }

    /// Functions (or files, for top-level calls) that call `name`
    pub async fn find_callers(&self, name: &str) -> Result<Vec<QueryResult>> {
        let rows = self.rows(CALLERS_SQL, vec![json!(name)]).await?;
        Ok(rows.iter().map(|r| QueryResult::from_row(r, call_line(r))).collect())
    }

    /// Functions and classes `name` calls
    pub async fn find_callees(&self, name: &str) -> Result<Vec<QueryResult>> {
        let rows = self.rows(CALLEES_SQL, vec![json!(name)]).await?;
        Ok(rows.iter().map(|r| QueryResult::from_row(r, call_line(r))).collect())
    }

    pub async fn dead_code(&self) -> Result<Vec<QueryResult>> {
        let rows = self.rows(DEAD_CODE_SQL, vec![]).await?;
        Ok(rows.iter().map(|r| QueryResult::from_row(r, None)).collect())
    }

    /// Ancestors and descendants of a class through INHERITS and IMPLEMENTS
    pub async fn class_hierarchy(&self, class: &str) -> Result<Hierarchy> {
        let depth = |r: &Row| r.get("depth").and_then(Value::as_u64).map(|d| format!("depth {}", d));
        let ancestors = self.rows(&hierarchy_sql(true), vec![json!(class)]).await?;
        let descendants = self.rows(&hierarchy_sql(false), vec![json!(class)]).await?;
        Ok(Hierarchy {
            class: class.to_string(),
            ancestors: ancestors.iter().map(|r| QueryResult::from_row(r, depth(r))).collect(),
            descendants: descendants.iter().map(|r| QueryResult::from_row(r, depth(r))).collect(),
        })
    }

    pub async fn most_complex(&self, limit: usize) -> Result<Vec<QueryResult>> {
        let rows = self.rows(MOST_COMPLEX_SQL, vec![json!(limit)]).await?;
        Ok(rows
            .iter()
            .map(|r| {
                let complexity = r.get("complexity").and_then(Value::as_u64);
                QueryResult::from_row(r, complexity.map(|c| format!("complexity {}", c)))
            })
            .collect())
    }

    /// Nearest descriptions to `query` by embedding, or a name search when
    /// no embedding provider is available
    pub async fn semantic_search(&self, query: &str, limit: usize) -> Result<Vec<QueryResult>> {
        let Some(embedder) = &self.embedder else {
            return self.search_names(query, limit).await;
        };

        let embedding = embedder
            .generate_embedding(query)
            .await
            .context("Failed to embed query")?;
        let hits = self.store.vector_search(&embedding, limit).await?;
        Ok(hits
            .into_iter()
            .map(|hit| QueryResult {
                kind: hit.node.label.as_str().to_string(),
                name: hit.node.get_str("name").unwrap_or_default().to_string(),
                path: hit.node.get_str("path").unwrap_or_default().to_string(),
                line: hit.node.get_u64("line"),
                detail: Some(match hit.description {
                    Some(description) => format!("{:.3} {}", hit.score, description),
                    None => format!("{:.3}", hit.score),
                }),
            })
            .collect())
    }

    /// Prefix match over symbol names
    pub async fn search_names(&self, query: &str, limit: usize) -> Result<Vec<QueryResult>> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| format!("\"{}\"*", t.replace('"', "\"\"")))
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .rows(NAME_SEARCH_SQL, vec![json!(terms.join(" ")), json!(limit)])
            .await?;
        Ok(rows.iter().map(|r| QueryResult::from_row(r, None)).collect())
    }

    pub async fn list_repositories(&self) -> Result<Vec<QueryResult>> {
        let rows = self.rows(REPOSITORIES_SQL, vec![]).await?;
        Ok(rows
            .iter()
            .map(|r| {
                let dependency = r.get("is_dependency").and_then(Value::as_i64) == Some(1);
                QueryResult::from_row(r, dependency.then(|| "dependency".to_string()))
            })
            .collect())
    }
}

fn call_line(row: &Row) -> Option<String> {
    row.get("call_line")
        .and_then(Value::as_u64)
        .map(|line| format!("line {}", line))
}
