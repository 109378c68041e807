use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::App;
use crate::index::graph::GraphStore;
use crate::index::jobs::{IndexJob, JobStatus, JobStore};
use crate::indexer::watcher::FileWatcher;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub async fn index_repository(app: &App, path: &Path, is_dependency: bool, watch: bool) -> Result<()> {
    println!("codegraph-sync v{}", env!("CARGO_PKG_VERSION"));
    println!("Repository: {}", path.display());
    println!("Database: {}", app.database.display());
    if is_dependency {
        println!("Indexing as dependency");
    }

    let job_id = app.indexer.index_directory(path, is_dependency)?;
    let job = follow_job(app, &job_id).await?;

    match job.status {
        JobStatus::Completed => {
            let stats = app.store.stats().await?;
            println!("\nIndexing complete!");
            println!("Files processed: {}/{}", job.files_processed, job.files_total);
            println!("Nodes: {}", stats.nodes);
            println!("Edges: {}", stats.edges);
            println!("Enriched: {}", stats.enriched);
        }
        _ => {
            bail!(
                "Indexing {} failed: {}",
                path.display(),
                job.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }

    if watch {
        watch_until_interrupted(app, &[path.to_path_buf()]).await?;
    } else {
        println!("Run with --watch to keep the graph in sync.");
    }
    Ok(())
}

/// Poll the job store until the job finishes, drawing a progress bar
async fn follow_job(app: &App, job_id: &str) -> Result<IndexJob> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} files {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    loop {
        let Some(job) = app.jobs.get(job_id) else {
            bar.abandon();
            bail!("Job {} disappeared from the job store", job_id);
        };

        bar.set_length(job.files_total as u64);
        bar.set_position(job.files_processed as u64);
        bar.set_message(job.phase.as_str());

        if job.status.is_terminal() {
            bar.finish_and_clear();
            return Ok(job);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Watch `roots` until Ctrl+C, keeping the graph in sync with every save
pub async fn watch_until_interrupted(app: &App, roots: &[PathBuf]) -> Result<()> {
    let debounce = Duration::from_millis(app.config.watcher.debounce_ms);
    let watcher = FileWatcher::new(app.indexer.clone(), debounce);

    for root in roots {
        watcher.watch(root).await?;
        println!("Watching {}", root.display());
    }
    println!("Monitoring for file changes. Press Ctrl+C to stop.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
    }

    info!("Stopping watchers for {} root(s)", watcher.watched_paths().len());
    watcher.close_all();
    Ok(())
}
