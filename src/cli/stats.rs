use anyhow::Result;
use serde_json::Value;
use std::path::Path;

use super::App;
use crate::index::graph::GraphStore;

pub async fn show_stats(app: &App, verbose: bool) -> Result<()> {
    let stats = app.store.stats().await?;

    println!("codegraph-sync statistics");
    println!("Project: {}", app.project.display());
    println!("Database: {}", app.database.display());

    println!("\nGraph:");
    println!("  Nodes: {}", stats.nodes);
    println!("  Edges: {}", stats.edges);
    println!("  Files: {}", stats.files);
    println!("  Enriched: {}", stats.enriched);
    if let Ok(metadata) = std::fs::metadata(&app.database) {
        println!("  Database size: {:.2} MB", metadata.len() as f64 / (1024.0 * 1024.0));
    }

    let repositories = app.query_engine().list_repositories().await?;
    if !repositories.is_empty() {
        println!("\nRepositories:");
        for repo in &repositories {
            match &repo.detail {
                Some(detail) => println!("  {} ({})", repo.path, detail),
                None => println!("  {}", repo.path),
            }
        }
    }

    if verbose {
        let labels = grouped_counts(app, "SELECT label AS key, COUNT(*) AS count FROM nodes GROUP BY label ORDER BY count DESC").await?;
        if !labels.is_empty() {
            println!("\nNodes by label:");
            for (label, count) in labels {
                println!("  {}: {}", label, count);
            }
        }

        let languages = grouped_counts(
            app,
            "SELECT json_extract(props, '$.language') AS key, COUNT(*) AS count FROM nodes
             WHERE label = 'File' GROUP BY key ORDER BY count DESC",
        )
        .await?;
        if !languages.is_empty() {
            println!("\nFiles by language:");
            for (language, count) in languages {
                println!("  {}: {}", language, count);
            }
        }

        let edges = grouped_counts(app, "SELECT type AS key, COUNT(*) AS count FROM edges GROUP BY type ORDER BY count DESC").await?;
        if !edges.is_empty() {
            println!("\nEdges by type:");
            for (rel, count) in edges {
                println!("  {}: {}", rel, count);
            }
        }
    }

    Ok(())
}

async fn grouped_counts(app: &App, sql: &str) -> Result<Vec<(String, u64)>> {
    let rows = app.store.run_query(sql, vec![]).await?;
    Ok(rows
        .iter()
        .map(|row| {
            let key = row.get("key").and_then(Value::as_str).unwrap_or("unknown").to_string();
            let count = row.get("count").and_then(Value::as_u64).unwrap_or_default();
            (key, count)
        })
        .collect())
}

pub async fn remove_file(app: &App, path: &Path) -> Result<()> {
    let removed = app.indexer.remove_file(path).await?;
    println!("Removed {} ({} nodes)", path.display(), removed);
    Ok(())
}

pub async fn remove_repository(app: &App, path: &Path) -> Result<()> {
    let removed = app.indexer.remove_repository(path).await?;
    println!("Removed repository {} ({} nodes)", path.display(), removed);
    Ok(())
}

pub async fn clear(app: &App) -> Result<()> {
    app.store.delete_all().await?;
    println!("Cleared all graph data from {}", app.database.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_grouped_counts_and_clear() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f():\n    pass\n").unwrap();
        let app = App::open(dir.path(), Config::default()).await.unwrap();
        let root = dir.path().canonicalize().unwrap();
        app.indexer.run_job("missing-job", &root, false).await;

        let labels = grouped_counts(&app, "SELECT label AS key, COUNT(*) AS count FROM nodes GROUP BY label ORDER BY key").await.unwrap();
        assert!(labels.contains(&("Function".to_string(), 1)));
        assert!(labels.contains(&("File".to_string(), 1)));

        clear(&app).await.unwrap();
        assert_eq!(app.store.stats().await.unwrap().nodes, 0);
    }
}
