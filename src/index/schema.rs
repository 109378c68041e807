use rusqlite::{Connection, Result};
use tracing::{debug, info};

use super::graph::NodeLabel;

/// SQLite schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the graph schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    info!("Initializing graph schema v{}", SCHEMA_VERSION);

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    debug!("Current schema version: {}", current_version);

    if current_version < SCHEMA_VERSION {
        info!("Upgrading schema from v{} to v{}", current_version, SCHEMA_VERSION);
        apply_migrations(conn, current_version)?;
    }

    Ok(())
}

/// Apply migrations from current version to latest
fn apply_migrations(conn: &Connection, from_version: i32) -> Result<()> {
    for version in (from_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration v{}", version);
        match version {
            1 => create_v1_schema(conn)?,
            _ => unreachable!("Unknown schema version: {}", version),
        }

        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    }

    Ok(())
}

/// Create v1 schema: nodes, edges, name search and enrichment records
fn create_v1_schema(conn: &Connection) -> Result<()> {
    info!("Creating v1 schema tables");

    // Nodes: one row per (label, key). `file` is the owning file for
    // file-owned labels, `repo` the repository the node was indexed under.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            label TEXT NOT NULL,
            key TEXT NOT NULL,
            name TEXT,
            path TEXT,
            line INTEGER,
            file TEXT,
            repo TEXT,
            props TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (label, key)
        )",
        [],
    )?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_nodes_file ON nodes(file)", [])?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_nodes_repo ON nodes(repo)", [])?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_nodes_label_name ON nodes(label, name)",
        [],
    )?;

    // Uniqueness constraints per label
    for label in [NodeLabel::Repository, NodeLabel::Directory, NodeLabel::File] {
        conn.execute(
            &format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS uq_{}_path ON nodes(path) WHERE label = '{}'",
                label.as_str().to_lowercase(),
                label.as_str()
            ),
            [],
        )?;
    }
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_module_name ON nodes(name) WHERE label = 'Module'",
        [],
    )?;
    for label in [NodeLabel::Function, NodeLabel::Class, NodeLabel::Variable] {
        conn.execute(
            &format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS uq_{}_symbol ON nodes(name, path, line) WHERE label = '{}'",
                label.as_str().to_lowercase(),
                label.as_str()
            ),
            [],
        )?;
    }

    // Edges cascade away with either endpoint
    conn.execute(
        "CREATE TABLE IF NOT EXISTS edges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            to_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            type TEXT NOT NULL,
            props TEXT NOT NULL DEFAULT '{}',
            UNIQUE (from_id, to_id, type)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id, type)",
        [],
    )?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_edges_type ON edges(type)", [])?;

    // Full-text search over symbol names
    conn.execute(
        "CREATE VIRTUAL TABLE IF NOT EXISTS nodes_fts USING fts5(
            name,
            content='nodes',
            content_rowid='id'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS nodes_fts_insert AFTER INSERT ON nodes
         BEGIN
             INSERT INTO nodes_fts(rowid, name) VALUES (new.id, new.name);
         END",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS nodes_fts_delete AFTER DELETE ON nodes
         BEGIN
             INSERT INTO nodes_fts(nodes_fts, rowid, name) VALUES ('delete', old.id, old.name);
         END",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS nodes_fts_update AFTER UPDATE OF name ON nodes
         BEGIN
             INSERT INTO nodes_fts(nodes_fts, rowid, name) VALUES ('delete', old.id, old.name);
             INSERT INTO nodes_fts(rowid, name) VALUES (new.id, new.name);
         END",
        [],
    )?;

    // Enrichment survives a file's full replace: keyed by qualified name and path,
    // not by node row.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrichment (
            label TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            path TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            description TEXT,
            embedding BLOB,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (label, name, path)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrichment_path ON enrichment(path)",
        [],
    )?;

    // One vector index per enrichable label
    for label in NodeLabel::ALL.iter().filter(|l| l.is_enrichable()) {
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_vector_{} ON enrichment(name, path)
                 WHERE label = '{}' AND embedding IS NOT NULL",
                label.as_str().to_lowercase(),
                label.as_str()
            ),
            [],
        )?;
    }

    info!("v1 schema created successfully");

    Ok(())
}

/// Drop all tables (for testing/rebuilding)
pub fn drop_schema(conn: &Connection) -> Result<()> {
    info!("Dropping all schema tables");

    conn.execute("DROP TABLE IF EXISTS schema_version", [])?;
    conn.execute("DROP TABLE IF EXISTS enrichment", [])?;
    conn.execute("DROP TRIGGER IF EXISTS nodes_fts_update", [])?;
    conn.execute("DROP TRIGGER IF EXISTS nodes_fts_delete", [])?;
    conn.execute("DROP TRIGGER IF EXISTS nodes_fts_insert", [])?;
    conn.execute("DROP TABLE IF EXISTS nodes_fts", [])?;
    conn.execute("DROP TABLE IF EXISTS edges", [])?;
    conn.execute("DROP TABLE IF EXISTS nodes", [])?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_init_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();

        assert!(tables.contains(&"nodes".to_string()));
        assert!(tables.contains(&"edges".to_string()));
        assert!(tables.contains(&"enrichment".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[test]
    fn test_unique_file_path() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO nodes (label, key, path) VALUES ('File', 'k1', 'a.js')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO nodes (label, key, path) VALUES ('File', 'k2', 'a.js')",
            [],
        );
        assert!(dup.is_err());

        // Same path under a different label is fine
        conn.execute(
            "INSERT INTO nodes (label, key, path) VALUES ('Directory', 'k3', 'a.js')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_drop_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        drop_schema(&conn).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert_eq!(count, 0);
    }

    #[test]
    fn test_idempotent_init() {
        let conn = Connection::open_in_memory().unwrap();

        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();

        assert_eq!(version, 1);
    }
}
